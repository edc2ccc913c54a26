//! Result cache with request coalescing and LRU eviction.
//!
//! # Architecture
//!
//! ```text
//! caller A ─┐
//!           │                         ┌──────────────┐
//! caller B ─┼──► get_or_compute ────► │ stored? hit  │
//!           │        │                └──────────────┘
//! caller C ─┘        ▼
//!              per-key slot lock ──► first caller computes,
//!                                    later callers wait and
//!                                    share the slot's value
//! ```
//!
//! Values are type-erased (`Arc<dyn Any>`) so one cache serves every
//! operation; the fingerprint already names the operation, so a key always
//! maps to one value type.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::fingerprint::CacheKey;
use super::stats::{CacheStatistics, CacheStats};
use crate::error::Result;
use crate::feature::DatasetId;

type Value = Arc<dyn Any + Send + Sync>;

/// Stored entry.
struct Entry {
    value: Value,
    /// Logical clock of the last access, for LRU eviction
    last_used: u64,
}

/// Rendezvous for callers of one key while it is being computed.
#[derive(Default)]
struct Slot {
    value: Mutex<Option<Value>>,
}

#[derive(Default)]
struct Store {
    entries: HashMap<CacheKey, Entry>,
    clock: u64,
}

/// Memoises operation results by content fingerprint.
///
/// # Thread Safety
///
/// - At most one computation runs per key: concurrent same-key callers
///   block on the key's slot and receive the first caller's value
/// - Different keys compute in parallel; the entry map lock is never held
///   while computing
/// - Errors are handed back to the caller that computed and are not stored
pub struct ResultCache {
    enabled: bool,
    capacity: usize,
    store: Mutex<Store>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Slot>>>,
    stats: Mutex<CacheStats>,
}

impl ResultCache {
    /// Enabled cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: true,
            capacity,
            store: Mutex::new(Store::default()),
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::new(capacity)),
        }
    }

    /// Cache that computes every time. Results are identical to an enabled
    /// cache; only the work done differs.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lookup<T: Any + Send + Sync>(&self, key: &CacheKey) -> Option<Arc<T>> {
        let mut store = self.store.lock();
        store.clock += 1;
        let now = store.clock;
        let entry = store.entries.get_mut(key)?;
        entry.last_used = now;
        Arc::clone(&entry.value).downcast::<T>().ok()
    }

    fn insert(&self, key: CacheKey, value: Value) {
        if self.capacity == 0 {
            return;
        }
        let mut store = self.store.lock();
        store.clock += 1;
        let now = store.clock;
        store.entries.insert(
            key,
            Entry {
                value,
                last_used: now,
            },
        );

        let mut evicted = 0;
        while store.entries.len() > self.capacity {
            let oldest = store
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k);
            let Some(oldest) = oldest else { break };
            store.entries.remove(&oldest);
            evicted += 1;
        }
        let entries = store.entries.len();
        drop(store);

        let mut stats = self.stats.lock();
        stats.record_evictions(evicted);
        stats.update_entry_count(entries);
        if evicted > 0 {
            trace!(evicted, entries, "Evicted least recently used results");
        }
    }

    /// Return the stored value for `key`, or run `compute` and store its
    /// result.
    ///
    /// Concurrent callers with the same key wait for the in-flight
    /// computation and share its value. A failed computation is returned
    /// to its caller only; a waiter then computes for itself.
    pub fn get_or_compute<T, F>(&self, key: CacheKey, compute: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        if !self.enabled {
            self.stats.lock().record_miss();
            return compute().map(Arc::new);
        }
        if let Some(value) = self.lookup::<T>(&key) {
            self.stats.lock().record_hit();
            trace!(key = %key, "Result cache hit");
            return Ok(value);
        }

        let slot = Arc::clone(self.in_flight.lock().entry(key).or_default());
        let mut guard = slot.value.lock();
        if let Some(value) = guard.as_ref().and_then(|v| Arc::clone(v).downcast::<T>().ok()) {
            drop(guard);
            self.stats.lock().record_coalesced();
            debug!(key = %key, "Shared in-flight result");
            return Ok(value);
        }
        if let Some(value) = self.lookup::<T>(&key) {
            drop(guard);
            self.stats.lock().record_hit();
            return Ok(value);
        }

        self.stats.lock().record_miss();
        let result = compute().map(Arc::new);
        match &result {
            Ok(value) => {
                let erased: Value = value.clone();
                *guard = Some(erased.clone());
                self.insert(key, erased);
            }
            Err(e) => {
                self.stats.lock().record_failure();
                debug!(key = %key, error = %e, "Computation failed, result not cached");
            }
        }
        drop(guard);

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            in_flight.remove(&key);
        }
        result
    }

    /// Whether a value is stored for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.lock().entries.contains_key(key)
    }

    pub fn entry_count(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Drop every entry scoped to `dataset`. Returns how many were removed.
    pub fn invalidate_scope(&self, dataset: DatasetId) -> usize {
        let mut store = self.store.lock();
        let before = store.entries.len();
        store.entries.retain(|key, _| key.scope != Some(dataset));
        let removed = before - store.entries.len();
        let entries = store.entries.len();
        drop(store);

        let mut stats = self.stats.lock();
        stats.record_invalidations(removed as u64);
        stats.update_entry_count(entries);
        if removed > 0 {
            debug!(dataset, removed, "Invalidated cached results for dataset");
        }
        removed
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let removed = {
            let mut store = self.store.lock();
            let n = store.entries.len();
            store.entries.clear();
            n
        };
        let mut stats = self.stats.lock();
        stats.record_invalidations(removed as u64);
        stats.update_entry_count(0);
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics::from_stats(&self.stats.lock())
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("enabled", &self.enabled)
            .field("capacity", &self.capacity)
            .field("entries", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Fingerprint;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(Fingerprint::builder(name).finish())
    }

    // =========================================================================
    // Hits, misses and errors
    // =========================================================================

    #[test]
    fn test_second_call_is_hit() {
        let cache = ResultCache::new(8);
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42u32)
        };
        assert_eq!(*cache.get_or_compute(key("a"), compute).unwrap(), 42);
        assert_eq!(*cache.get_or_compute(key("a"), compute).unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = ResultCache::new(8);
        let failed = cache.get_or_compute::<u32, _>(key("a"), || {
            Err(EngineError::InvalidInput("boom".into()))
        });
        assert!(failed.is_err());
        assert!(!cache.contains(&key("a")));
        assert_eq!(*cache.get_or_compute(key("a"), || Ok(7u32)).unwrap(), 7);
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn test_disabled_computes_every_time() {
        let cache = ResultCache::disabled();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let v = cache
                .get_or_compute(key("a"), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("same".to_string())
                })
                .unwrap();
            assert_eq!(v.as_str(), "same");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.entry_count(), 0);
    }

    // =========================================================================
    // Eviction and invalidation
    // =========================================================================

    #[test]
    fn test_lru_eviction() {
        let cache = ResultCache::new(2);
        cache.get_or_compute(key("a"), || Ok(1u8)).unwrap();
        cache.get_or_compute(key("b"), || Ok(2u8)).unwrap();
        // Touch "a" so "b" becomes least recently used
        cache.get_or_compute(key("a"), || Ok(1u8)).unwrap();
        cache.get_or_compute(key("c"), || Ok(3u8)).unwrap();
        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_invalidate_scope() {
        let cache = ResultCache::new(8);
        let fp = |n: &str| Fingerprint::builder(n).finish();
        cache.get_or_compute(CacheKey::scoped(1, fp("a")), || Ok(1u8)).unwrap();
        cache.get_or_compute(CacheKey::scoped(1, fp("b")), || Ok(2u8)).unwrap();
        cache.get_or_compute(CacheKey::scoped(2, fp("a")), || Ok(3u8)).unwrap();
        cache.get_or_compute(CacheKey::new(fp("a")), || Ok(4u8)).unwrap();

        assert_eq!(cache.invalidate_scope(1), 2);
        assert_eq!(cache.entry_count(), 2);
        assert!(cache.contains(&CacheKey::scoped(2, fp("a"))));
        assert_eq!(cache.stats().invalidations, 2);
    }

    // =========================================================================
    // Coalescing
    // =========================================================================

    #[test]
    fn test_concurrent_same_key_computes_once() {
        let cache = Arc::new(ResultCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(key("slow"), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(vec![1u8, 2, 3])
                        })
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<Arc<Vec<u8>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| **r == vec![1u8, 2, 3]));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.coalesced, 7);
    }

    #[test]
    fn test_coalescing_with_zero_capacity() {
        let cache = Arc::new(ResultCache::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(key("k"), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(5u64)
                        })
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(*h.join().unwrap(), 5);
        }
        // Late arrivals after the slot is retired recompute; those waiting
        // during the computation share it
        assert!(calls.load(Ordering::SeqCst) < 4);
        assert_eq!(cache.entry_count(), 0);
    }
}
