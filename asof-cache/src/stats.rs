//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of cache activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Query calls answered without touching the source.
    pub hits: u64,
    /// Query calls that triggered at least one source call.
    pub misses: u64,
    /// Single-entity floor lookups at an uncovered key.
    pub point_loads: u64,
    /// Bulk ascending pages requested.
    pub bulk_loads: u64,
    /// Single-entity floor lookups below a segment start.
    pub backward_loads: u64,
    /// Times the store was cleared.
    pub evictions: u64,
    /// Entries currently held.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total number of source calls.
    pub fn source_calls(&self) -> u64 {
        self.point_loads + self.bulk_loads + self.backward_loads
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    point_loads: AtomicU64,
    bulk_loads: AtomicU64,
    backward_loads: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_point_load(&self) {
        self.point_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bulk_load(&self) {
        self.bulk_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backward_load(&self) {
        self.backward_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            point_loads: self.point_loads.load(Ordering::Relaxed),
            bulk_loads: self.bulk_loads.load(Ordering::Relaxed),
            backward_loads: self.backward_loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: entry_count as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StatsCounters::default();
        counters.record_hit();
        counters.record_miss();
        counters.record_point_load();
        counters.record_bulk_load();
        counters.record_bulk_load();
        counters.record_backward_load();
        counters.record_eviction();

        let stats = counters.snapshot(7);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.bulk_loads, 2);
        assert_eq!(stats.source_calls(), 4);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 7);
    }
}
