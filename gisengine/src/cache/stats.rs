//! Result cache statistics.

use std::time::Instant;

use serde::Serialize;

/// Counters for monitoring the result cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Lookups answered from a stored entry
    pub hits: u64,
    /// Lookups that ran the computation
    pub misses: u64,
    /// Callers that waited on another caller's in-flight computation
    pub coalesced: u64,
    /// Computations that returned an error (never stored)
    pub failures: u64,
    pub evictions: u64,
    /// Entries removed by scope invalidation or clearing
    pub invalidations: u64,
    pub entry_count: usize,
    pub capacity: usize,
    pub created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CacheStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            hits: 0,
            misses: 0,
            coalesced: 0,
            failures: 0,
            evictions: 0,
            invalidations: 0,
            entry_count: 0,
            capacity,
            created_at: Instant::now(),
        }
    }

    /// Fraction of lookups served without computing (0.0 to 1.0).
    ///
    /// Coalesced waiters count as hits.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_coalesced(&mut self) {
        self.coalesced += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_evictions(&mut self, count: u64) {
        self.evictions += count;
    }

    pub fn record_invalidations(&mut self, count: u64) {
        self.invalidations += count;
    }

    pub fn update_entry_count(&mut self, entries: usize) {
        self.entry_count = entries;
    }
}

/// Serializable snapshot of [`CacheStats`] for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub failures: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub entry_count: usize,
    pub capacity: usize,
    pub hit_rate_percent: f64,
    pub uptime_secs: u64,
}

impl CacheStatistics {
    pub fn from_stats(stats: &CacheStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            coalesced: stats.coalesced,
            failures: stats.failures,
            evictions: stats.evictions,
            invalidations: stats.invalidations,
            entry_count: stats.entry_count,
            capacity: stats.capacity,
            hit_rate_percent: stats.hit_rate() * 100.0,
            uptime_secs: stats.uptime().as_secs(),
        }
    }

    /// Human-readable summary.
    pub fn format(&self) -> String {
        format!(
            r#"Result Cache Statistics

ENTRIES
  Stored:      {} / {}
  Evictions:   {}
  Invalidated: {}

LOOKUPS
  Hits:        {}
  Coalesced:   {}
  Misses:      {}
  Failures:    {}
  Hit Rate:    {:.1}%

Uptime:        {}s
"#,
            self.entry_count,
            self.capacity,
            self.evictions,
            self.invalidations,
            self.hits,
            self.coalesced,
            self.misses,
            self.failures,
            self.hit_rate_percent,
            self.uptime_secs,
        )
    }
}
