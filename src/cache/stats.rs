//! Cache Statistics Module
//!
//! Tracks cache metrics including hits, misses, and evictions.

use serde::Serialize;

// == Cache Stats ==
/// Snapshot of cache metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of reads that returned a value
    pub hits: u64,
    /// Number of reads that found nothing
    pub misses: u64,
    /// Number of entries removed by prune passes
    pub evictions: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// Aggregate byte size, `None` once size tracking is disabled
    pub total_bytes: Option<usize>,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self {
            total_bytes: Some(0),
            ..Self::default()
        }
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Evictions ==
    /// Adds the entries removed by one prune pass.
    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_bytes, Some(0));
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_record_evictions() {
        let mut stats = CacheStats::new();
        stats.record_evictions(2);
        stats.record_evictions(0);
        stats.record_evictions(1);
        assert_eq!(stats.evictions, 3);
    }

    #[test]
    fn test_stats_serialize_unmeasured_size_as_null() {
        let stats = CacheStats {
            total_bytes: None,
            ..CacheStats::new()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["total_bytes"].is_null());
    }
}
