//! Default in-process result cache.
//!
//! Backed by a `moka` cache bounded by entry count. Each entry carries its own
//! live and idle times; pending maintenance (expiry sweeps, admission) runs at
//! most once per eviction delay on the write path.

use std::time::{Duration, Instant};

use daoplan_core::cache::{CacheStore, CachedValue};
use daoplan_core::decl::CacheSettings;
use moka::sync::Cache;
use moka::Expiry;
use parking_lot::Mutex;

#[derive(Clone)]
struct Slot {
    value: CachedValue,
    live: Duration,
    idle: Duration,
}

/// Expires a slot at the earlier of its live deadline and its idle deadline.
struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &String, slot: &Slot, _created_at: Instant) -> Option<Duration> {
        Some(slot.live.min(slot.idle))
    }

    fn expire_after_read(
        &self,
        _key: &String,
        slot: &Slot,
        read_at: Instant,
        _remaining: Option<Duration>,
        last_modified_at: Instant,
    ) -> Option<Duration> {
        let live_left = slot.live.saturating_sub(read_at.saturating_duration_since(last_modified_at));
        Some(live_left.min(slot.idle))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        slot: &Slot,
        _updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        Some(slot.live.min(slot.idle))
    }
}

pub struct LocalCache {
    capacity: usize,
    evict_delay: Duration,
    entries: Cache<String, Slot>,
    last_sweep: Mutex<Instant>,
}

impl LocalCache {
    pub fn new(capacity: usize, evict_delay: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .expire_after(SlotExpiry)
            .build();
        Self {
            capacity,
            evict_delay,
            entries,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.capacity, Duration::from_millis(settings.evict_delay_ms))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_sweep.lock();
            if now.duration_since(*last) < self.evict_delay {
                return;
            }
            *last = now;
        }
        self.entries.run_pending_tasks();
        tracing::trace!(remaining = self.entries.entry_count(), "swept result cache");
    }
}

impl CacheStore for LocalCache {
    fn get(&self, key: &str) -> Option<CachedValue> {
        self.entries.get(key).map(|slot| slot.value)
    }

    fn put(&self, key: String, value: CachedValue, live: Duration, idle: Duration) -> bool {
        if self.capacity == 0 {
            return false;
        }
        self.entries.insert(key, Slot { value, live, idle });
        self.sweep_if_due();
        true
    }

    fn remove(&self, key: &str) {
        self.entries.invalidate(key);
    }

    fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
