//! Pluggable result-cache store.

use std::time::Duration;

use crate::value::{RowSet, Value};

/// Snapshot kept by a cache store.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Value(Value),
    RowSet(RowSet),
}

/// Thread-safe key/value store with per-entry live and idle times.
///
/// Implementations synchronize internally; callers add no locking.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedValue>;

    /// Returns false when the store declined the entry (e.g. at capacity).
    fn put(&self, key: String, value: CachedValue, live: Duration, idle: Duration) -> bool;

    fn remove(&self, key: &str);

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
