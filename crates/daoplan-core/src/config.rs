//! Runtime defaults that downstream crates can serialize/deserialize.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decl::CacheSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaoConfig {
    /// Chunk size for bulk writes when a tag does not set one.
    pub default_batch_size: usize,

    /// Cache store capacity when an interface caches but declares no settings.
    pub cache_capacity: usize,

    /// Minimum delay between sweeps of expired cache entries.
    pub cache_evict_delay_ms: u64,

    /// Default live/idle time of cached results.
    pub cache_live_time_ms: u64,
    pub cache_idle_time_ms: u64,

    /// Fetch size hint for stream queries without an explicit one.
    pub stream_fetch_size: Option<u32>,

    /// Log SQL text of every statement regardless of declarations.
    pub sql_log: bool,

    /// Perf-log threshold applied when nothing is declared (0 = off).
    pub min_operation_ms: u64,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 200,
            cache_capacity: 1000,
            cache_evict_delay_ms: 3_000,
            cache_live_time_ms: 30 * 60 * 1000, // 30 min
            cache_idle_time_ms: 3 * 60 * 1000,  // 3 min
            stream_fetch_size: None,
            sql_log: false,
            min_operation_ms: 0,
        }
    }
}

impl DaoConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `DAOPLAN_BATCH_SIZE`: default chunk size for bulk writes
    /// - `DAOPLAN_CACHE_CAPACITY`: default cache capacity
    /// - `DAOPLAN_CACHE_EVICT_DELAY_MS`: sweep interval
    /// - `DAOPLAN_CACHE_LIVE_MS` / `DAOPLAN_CACHE_IDLE_MS`: entry lifetimes
    /// - `DAOPLAN_STREAM_FETCH_SIZE`: fetch size hint for streams
    /// - `DAOPLAN_SQL_LOG`: `1`/`true` to log all SQL
    /// - `DAOPLAN_MIN_OPERATION_MS`: global perf-log threshold
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<usize>("DAOPLAN_BATCH_SIZE") {
            if v > 0 {
                cfg.default_batch_size = v;
            }
        }
        if let Some(v) = env_parse::<usize>("DAOPLAN_CACHE_CAPACITY") {
            cfg.cache_capacity = v;
        }
        if let Some(v) = env_parse::<u64>("DAOPLAN_CACHE_EVICT_DELAY_MS") {
            cfg.cache_evict_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("DAOPLAN_CACHE_LIVE_MS") {
            cfg.cache_live_time_ms = v;
        }
        if let Some(v) = env_parse::<u64>("DAOPLAN_CACHE_IDLE_MS") {
            cfg.cache_idle_time_ms = v;
        }
        if let Some(v) = env_parse::<u32>("DAOPLAN_STREAM_FETCH_SIZE") {
            cfg.stream_fetch_size = Some(v);
        }
        if let Ok(s) = std::env::var("DAOPLAN_SQL_LOG") {
            cfg.sql_log = matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env_parse::<u64>("DAOPLAN_MIN_OPERATION_MS") {
            cfg.min_operation_ms = v;
        }

        cfg
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            capacity: self.cache_capacity,
            evict_delay_ms: self.cache_evict_delay_ms,
        }
    }

    pub fn live_time(&self) -> Duration {
        Duration::from_millis(self.cache_live_time_ms)
    }

    pub fn idle_time(&self) -> Duration {
        Duration::from_millis(self.cache_idle_time_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DaoConfig::default();
        assert_eq!(cfg.default_batch_size, 200);
        assert_eq!(cfg.cache_settings().capacity, 1000);
        assert_eq!(cfg.idle_time(), Duration::from_secs(180));
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = DaoConfig {
            stream_fetch_size: Some(64),
            ..DaoConfig::default()
        };
        let json = serde_json::to_string(&cfg).expect("encode");
        let back: DaoConfig = serde_json::from_str(&json).expect("decode");
        assert_eq!(back, cfg);
    }
}
