//! Eviction Policy Module
//!
//! Thresholds controlling automatic eviction, and the pass that selects
//! which entries violate them.

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::cache::entry::{total_size, CacheEntry};

// == Eviction Policy ==
/// Thresholds for automatic eviction. A value of `0` disables a threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionPolicy {
    /// Maximum entries before the oldest are evicted
    pub max_items: usize,
    /// Maximum age in milliseconds before an entry is evicted
    pub max_age_ms: u64,
    /// Maximum aggregate byte size before the oldest entries are evicted
    pub max_bytes: usize,
}

impl EvictionPolicy {
    /// Policy with every threshold disabled.
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age_ms = max_age.as_millis() as u64;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Whether no threshold is active.
    pub fn is_disabled(&self) -> bool {
        self.max_items == 0 && self.max_age_ms == 0 && self.max_bytes == 0
    }

    // == Select Evictions ==
    /// Returns the keys that must be removed to satisfy the policy, oldest
    /// first.
    ///
    /// Runs an age pass, then a count pass, then a byte-size pass, each over
    /// the survivors of the previous one. The byte-size pass is skipped when
    /// `can_measure_size` is false.
    pub fn select_evictions<V>(
        &self,
        entries: &[&CacheEntry<V>],
        now: Instant,
        can_measure_size: bool,
    ) -> Vec<String> {
        if entries.is_empty() || self.is_disabled() {
            return Vec::new();
        }

        let mut survivors: Vec<&CacheEntry<V>> = entries.to_vec();
        survivors.sort_by_key(|entry| entry.order());
        let mut remove: Vec<String> = Vec::new();

        if self.max_age_ms > 0 {
            let max_age = Duration::from_millis(self.max_age_ms);
            let (expired, fresh): (Vec<_>, Vec<_>) =
                survivors.into_iter().partition(|entry| entry.age(now) > max_age);
            remove.extend(expired.into_iter().map(|entry| entry.key.clone()));
            survivors = fresh;
        }

        if self.max_items > 0 && survivors.len() > self.max_items {
            let excess = survivors.len() - self.max_items;
            remove.extend(survivors.drain(..excess).map(|entry| entry.key.clone()));
        }

        if self.max_bytes > 0 && can_measure_size {
            let mut remaining = total_size(entries.iter().copied(), &remove);
            let mut oldest = survivors.into_iter();

            while remaining > self.max_bytes {
                match oldest.next() {
                    Some(entry) => {
                        remaining -= entry.byte_size;
                        remove.push(entry.key.clone());
                    }
                    None => break,
                }
            }
        }

        remove
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn entries(sizes: &[(&str, usize)]) -> Vec<CacheEntry<String>> {
        sizes
            .iter()
            .enumerate()
            .map(|(seq, (key, size))| {
                CacheEntry::new(key.to_string(), "v".to_string(), *size, seq as u64)
            })
            .collect()
    }

    fn refs<V>(items: &[CacheEntry<V>]) -> Vec<&CacheEntry<V>> {
        items.iter().collect()
    }

    #[test]
    fn test_disabled_policy_selects_nothing() {
        let items = entries(&[("a", 1), ("b", 2)]);
        let policy = EvictionPolicy::unlimited();

        assert!(policy.is_disabled());
        assert!(policy.select_evictions(&refs(&items), Instant::now(), true).is_empty());
    }

    #[test]
    fn test_count_pass_removes_oldest() {
        let items = entries(&[("k1", 1), ("k2", 1), ("k3", 1)]);
        let policy = EvictionPolicy::default().with_max_items(2);

        let removed = policy.select_evictions(&refs(&items), Instant::now(), true);
        assert_eq!(removed, vec!["k1".to_string()]);
    }

    #[test]
    fn test_order_ignores_slice_order() {
        let mut items = entries(&[("k1", 1), ("k2", 1), ("k3", 1)]);
        items.reverse();
        let policy = EvictionPolicy::default().with_max_items(1);

        let removed = policy.select_evictions(&refs(&items), Instant::now(), true);
        assert_eq!(removed, vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn test_byte_pass_removes_until_within_limit() {
        let items = entries(&[("first", 10), ("second", 12), ("third", 15)]);

        let policy = EvictionPolicy::default().with_max_bytes(27);
        let removed = policy.select_evictions(&refs(&items), Instant::now(), true);
        assert_eq!(removed, vec!["first".to_string()]);

        let policy = EvictionPolicy::default().with_max_bytes(15);
        let removed = policy.select_evictions(&refs(&items), Instant::now(), true);
        assert_eq!(removed, vec!["first".to_string(), "second".to_string()]);

        // 15 bytes still exceed 13, so the newest entry goes too
        let policy = EvictionPolicy::default().with_max_bytes(13);
        let removed = policy.select_evictions(&refs(&items), Instant::now(), true);
        assert_eq!(
            removed,
            vec!["first".to_string(), "second".to_string(), "third".to_string()]
        );
    }

    #[test]
    fn test_byte_pass_skipped_when_unmeasurable() {
        let items = entries(&[("first", 10), ("second", 12)]);
        let policy = EvictionPolicy::default().with_max_bytes(1);

        assert!(policy.select_evictions(&refs(&items), Instant::now(), false).is_empty());
    }

    #[test]
    fn test_byte_pass_can_remove_everything() {
        let items = entries(&[("a", 5), ("b", 5)]);
        let policy = EvictionPolicy::default().with_max_bytes(1);

        let removed = policy.select_evictions(&refs(&items), Instant::now(), true);
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passes_compose_oldest_first() {
        let old = entries(&[("old", 5)]);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let fresh: Vec<CacheEntry<String>> = [("a", 5), ("b", 5), ("c", 5), ("d", 5)]
            .iter()
            .enumerate()
            .map(|(i, (k, s))| CacheEntry::new(k.to_string(), "v".into(), *s, 10 + i as u64))
            .collect();

        let mut all: Vec<&CacheEntry<String>> = refs(&fresh);
        all.push(&old[0]);

        let policy = EvictionPolicy::default()
            .with_max_age(Duration::from_millis(100))
            .with_max_items(3)
            .with_max_bytes(10);

        let removed = policy.select_evictions(&all, Instant::now(), true);
        assert_eq!(
            removed,
            vec!["old".to_string(), "a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_policy_deserializes_with_missing_fields() {
        let policy: EvictionPolicy = serde_json::from_str(r#"{"max_items":2}"#).unwrap();
        assert_eq!(policy, EvictionPolicy::default().with_max_items(2));
    }
}
