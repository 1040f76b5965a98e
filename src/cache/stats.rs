//! Cache Statistics Module
//!
//! Tracks operation counters shared by the facade, the sweeper and the flush pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Lock-free counters updated from every cache actor.
#[derive(Debug, Default)]
pub struct CacheStats {
    sets: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    flushed: AtomicU64,
    skipped: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Hit ==
    /// Counts a read that found a live row.
    pub fn record_hit(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    // == Record Miss ==
    /// Counts a read that found nothing (never set, deleted or expired).
    pub fn record_miss(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self) {
        self.flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads all counters; gauges are supplied by the caller.
    pub fn snapshot(&self, entries: usize, queue_depth: usize, log_bytes: u64) -> StatsSnapshot {
        StatsSnapshot {
            sets: self.sets.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries,
            queue_depth,
            log_bytes,
        }
    }
}

// == Stats Snapshot ==
/// Point-in-time copy of the counters, safe to hand to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub sets: u64,
    pub gets: u64,
    pub deletes: u64,
    pub hits: u64,
    pub misses: u64,
    /// Entries evicted by the sweeper
    pub expirations: u64,
    /// Mutations confirmed by the backing store
    pub flushed: u64,
    /// Mutations skipped as already applied
    pub skipped: u64,
    pub retries: u64,
    /// Mutations set aside after exhausting retries
    pub failures: u64,
    /// Entries currently held, pending deletions included
    pub entries: usize,
    /// Mutations waiting in the flush queue
    pub queue_depth: usize,
    /// Current size of the write-ahead log
    pub log_bytes: u64,
}

impl StatsSnapshot {
    /// Total facade operations.
    pub fn total_operations(&self) -> u64 {
        self.sets + self.gets + self.deletes
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let snap = CacheStats::new().snapshot(0, 0, 0);
        assert_eq!(snap, StatsSnapshot::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let snap = CacheStats::new().snapshot(0, 0, 0);
        assert_eq!(snap.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();

        let snap = stats.snapshot(0, 0, 0);
        assert_eq!(snap.gets, 2);
        assert_eq!(snap.hit_rate(), 0.5);
    }

    #[test]
    fn test_total_operations() {
        let stats = CacheStats::new();
        stats.record_set();
        stats.record_set();
        stats.record_delete();
        stats.record_hit();

        assert_eq!(stats.snapshot(0, 0, 0).total_operations(), 4);
    }

    #[test]
    fn test_pipeline_counters() {
        let stats = CacheStats::new();
        stats.record_expiration();
        stats.record_flushed();
        stats.record_skipped();
        stats.record_retry();
        stats.record_retry();
        stats.record_failure();

        let snap = stats.snapshot(3, 1, 512);
        assert_eq!(snap.expirations, 1);
        assert_eq!(snap.flushed, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.entries, 3);
        assert_eq!(snap.queue_depth, 1);
        assert_eq!(snap.log_bytes, 512);
    }
}
