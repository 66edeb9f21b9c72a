//! Counters for file table activity.
//!
//! All counters are monotonically increasing atomics updated with relaxed
//! ordering. They are diagnostic only and never feed back into table
//! decisions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free activity counters for a [`FileTable`](crate::FileTable).
#[derive(Debug, Default)]
pub struct FileTableStats {
    /// Successful opens (any path).
    pub opens: AtomicU64,
    /// Opens served by an already active object.
    pub active_hits: AtomicU64,
    /// Opens that pulled an object back out of the idle cache.
    pub reactivations: AtomicU64,
    /// Objects built by the backend.
    pub materializations: AtomicU64,
    /// Opens that failed because the object does not exist.
    pub misses: AtomicU64,
    /// Idle objects flushed and dropped to make room.
    pub evictions: AtomicU64,
    /// Backend finalize calls that failed.
    pub flush_failures: AtomicU64,
    /// Objects still referenced when the table was torn down.
    pub leaked_handles: AtomicU64,
}

impl FileTableStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_active_hit(&self) {
        self.active_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reactivation(&self) {
        self.reactivations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_materialization(&self) {
        self.materializations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_leaked_handle(&self) {
        self.leaked_handles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FileTableStatsSnapshot {
        FileTableStatsSnapshot {
            opens: self.opens.load(Ordering::Relaxed),
            active_hits: self.active_hits.load(Ordering::Relaxed),
            reactivations: self.reactivations.load(Ordering::Relaxed),
            materializations: self.materializations.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            leaked_handles: self.leaked_handles.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.opens.store(0, Ordering::Relaxed);
        self.active_hits.store(0, Ordering::Relaxed);
        self.reactivations.store(0, Ordering::Relaxed);
        self.materializations.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.flush_failures.store(0, Ordering::Relaxed);
        self.leaked_handles.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`FileTableStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTableStatsSnapshot {
    pub opens: u64,
    pub active_hits: u64,
    pub reactivations: u64,
    pub materializations: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flush_failures: u64,
    pub leaked_handles: u64,
}

impl FileTableStatsSnapshot {
    /// Fraction of opens served without asking the backend (0.0 to 1.0).
    ///
    /// Returns 0.0 if nothing has been opened yet.
    pub fn hit_rate(&self) -> f64 {
        if self.opens == 0 {
            return 0.0;
        }
        (self.active_hits + self.reactivations) as f64 / self.opens as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let stats = FileTableStats::new();
        stats.record_open();
        stats.record_open();
        stats.record_open();
        stats.record_open();
        stats.record_materialization();
        stats.record_active_hit();
        stats.record_reactivation();
        stats.record_reactivation();
        stats.record_evictions(8);
        stats.record_flush_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.opens, 4);
        assert_eq!(snap.materializations, 1);
        assert_eq!(snap.evictions, 8);
        assert_eq!(snap.flush_failures, 1);
        assert!((snap.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_rate_empty() {
        assert!(FileTableStatsSnapshot::default().hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let stats = FileTableStats::new();
        stats.record_miss();
        stats.record_leaked_handle();
        stats.reset();
        assert_eq!(stats.snapshot(), FileTableStatsSnapshot::default());
    }
}
