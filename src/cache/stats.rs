//! Cache Statistics Module
//!
//! Aggregate store size plus hit, miss and eviction counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Stats ==
/// Read-only snapshot of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently stored
    pub entry_count: usize,
    /// Sum of stored payload sizes in bytes
    pub total_bytes: u64,
    /// Insertion time of the oldest entry, None when empty
    pub oldest_entry_timestamp: Option<DateTime<Utc>>,
    /// Number of `get` calls that returned an entry
    pub hits: u64,
    /// Number of `get` calls that returned nothing
    pub misses: u64,
    /// Number of entries removed to make room
    pub evictions: u64,
    /// Number of `put` calls skipped by policy
    pub rejections: u64,
    /// Number of `put` calls that failed to persist
    pub write_failures: u64,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Counters ==
/// Lock-free counters updated from concurrent readers and writers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rejections: AtomicU64,
    write_failures: AtomicU64,
}

impl Counters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters into `stats`.
    pub fn fill(&self, stats: &mut CacheStats) {
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats.evictions = self.evictions.load(Ordering::Relaxed);
        stats.rejections = self.rejections.load(Ordering::Relaxed);
        stats.write_failures = self.write_failures.load(Ordering::Relaxed);
    }
}
