//! Cache Store Module
//!
//! Main cache engine: HashMap storage with a replaceable eviction policy
//! enforced by a debounced prune pass.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats, CacheValue, EvictionPolicy};
use crate::config::{CacheConfig, DEFAULT_PRUNE_DELAY_MS};
use crate::events::{CacheEvent, EventBus};
use crate::tasks::Debouncer;

// == Cache State ==
/// Mutable state guarded by the store's lock.
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    policy: EvictionPolicy,
    /// Cleared permanently the first time a stored value cannot be measured
    can_measure_size: bool,
    next_seq: u64,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn total_size(&self) -> Option<usize> {
        self.can_measure_size
            .then(|| self.entries.values().map(|entry| entry.byte_size).sum())
    }
}

struct Shared<V> {
    state: Mutex<CacheState<V>>,
    events: EventBus<CacheEvent>,
    debouncer: Debouncer,
    prune_delay: Duration,
}

impl<V: CacheValue> Shared<V> {
    fn prune(&self) -> Vec<String> {
        let removed = {
            let mut state = self.state.lock();
            let candidates: Vec<&CacheEntry<V>> = state.entries.values().collect();
            let removed = state.policy.select_evictions(
                &candidates,
                Instant::now(),
                state.can_measure_size,
            );
            for key in &removed {
                state.entries.remove(key);
            }
            state.stats.record_evictions(removed.len());
            removed
        };

        if removed.is_empty() {
            debug!("Prune: nothing to evict");
        } else {
            debug!("Prune: evicted {} entries", removed.len());
            self.events.emit(CacheEvent::ItemsEvicted(removed.clone()));
        }
        removed
    }
}

// == Eviction Cache ==
/// Key/value store with policy-based eviction.
///
/// Handles are cheap to clone and share the same storage. Every `add` and
/// `update_policy` (re)starts a debounce timer; when it fires, one prune pass
/// removes whatever the policy no longer allows and emits
/// [`CacheEvent::ItemsEvicted`]. Outside a tokio runtime the prune pass runs
/// inline instead.
pub struct EvictionCache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for EvictionCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V: CacheValue> EvictionCache<V> {
    // == Constructors ==
    /// Creates a cache enforcing `policy`, pruning 10 ms after the last write.
    pub fn new(policy: EvictionPolicy) -> Self {
        Self::with_prune_delay(policy, Duration::from_millis(DEFAULT_PRUNE_DELAY_MS))
    }

    /// Creates a cache with an explicit prune debounce delay.
    pub fn with_prune_delay(policy: EvictionPolicy, prune_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    policy,
                    can_measure_size: true,
                    next_seq: 0,
                    stats: CacheStats::new(),
                }),
                events: EventBus::new(),
                debouncer: Debouncer::new(),
                prune_delay,
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_prune_delay(config.policy(), config.prune_delay())
    }

    // == Add ==
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// `None` is ignored. A value that cannot be measured disables size
    /// tracking for the rest of this cache's life.
    pub fn add(&self, key: impl Into<String>, value: impl Into<Option<V>>) -> &Self {
        if let Some(value) = value.into() {
            let key = key.into();
            let mut state = self.shared.state.lock();

            let byte_size = if state.can_measure_size {
                match value.byte_size() {
                    Some(size) => size,
                    None => {
                        warn!("Value for {} cannot be measured, size tracking disabled", key);
                        state.can_measure_size = false;
                        0
                    }
                }
            } else {
                0
            };

            let seq = state.next_seq;
            state.next_seq += 1;
            state
                .entries
                .insert(key.clone(), CacheEntry::new(key, value, byte_size, seq));
        }

        self.schedule_prune();
        self
    }

    // == Get ==
    /// Returns the stored value, or `None` if missing or empty.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.shared.state.lock();
        let value = state
            .entries
            .get(key)
            .filter(|entry| !entry.value.is_empty_value())
            .map(|entry| entry.value.clone());

        match value {
            Some(_) => state.stats.record_hit(),
            None => state.stats.record_miss(),
        }
        value
    }

    // == Contains ==
    /// Whether `key` is stored. Empty values only count when `allow_empty`.
    pub fn contains(&self, key: &str, allow_empty: bool) -> bool {
        self.shared
            .state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| allow_empty || !entry.value.is_empty_value())
    }

    // == Remove ==
    /// Removes `key` immediately. Missing keys are ignored and no event fires.
    pub fn remove(&self, key: &str) -> &Self {
        self.shared.state.lock().entries.remove(key);
        self
    }

    // == Clear ==
    pub fn clear(&self) -> &Self {
        self.shared.state.lock().entries.clear();
        self
    }

    // == Policy ==
    /// Replaces the active policy and schedules a prune.
    pub fn update_policy(&self, policy: EvictionPolicy) -> &Self {
        self.shared.state.lock().policy = policy;
        self.schedule_prune();
        self
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.shared.state.lock().policy
    }

    // == Prune ==
    /// Runs an eviction pass now, returning the evicted keys oldest first.
    pub fn prune(&self) -> Vec<String> {
        self.shared.prune()
    }

    fn schedule_prune(&self) {
        let weak: Weak<Shared<V>> = Arc::downgrade(&self.shared);
        let scheduled = self.shared.debouncer.schedule(self.shared.prune_delay, move || {
            if let Some(shared) = weak.upgrade() {
                shared.prune();
            }
        });
        if !scheduled {
            self.shared.prune();
        }
    }

    // == Size ==
    /// Aggregate byte size of all entries, or `None` once size tracking has
    /// been disabled by an unmeasurable value.
    pub fn size(&self) -> Option<usize> {
        self.shared.state.lock().total_size()
    }

    pub fn can_measure_size(&self) -> bool {
        self.shared.state.lock().can_measure_size
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    // == Keys ==
    /// Stored keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut entries: Vec<&CacheEntry<V>> = state.entries.values().collect();
        entries.sort_by_key(|entry| entry.order());
        entries.into_iter().map(|entry| entry.key.clone()).collect()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            total_entries: state.entries.len(),
            total_bytes: state.total_size(),
            ..state.stats.clone()
        }
    }

    // == Events ==
    /// Bus carrying [`CacheEvent`]s for this cache.
    pub fn events(&self) -> &EventBus<CacheEvent> {
        &self.shared.events
    }
}

impl<V: CacheValue> Default for EvictionCache<V> {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

impl<V> fmt::Debug for EvictionCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("EvictionCache")
            .field("len", &state.entries.len())
            .field("policy", &state.policy)
            .field("can_measure_size", &state.can_measure_size)
            .field("prune_pending", &self.shared.debouncer.is_pending())
            .finish()
    }
}
