//! Cache Entry Module
//!
//! Defines individual cache entries and how stored values are measured.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{Duration, Instant};

// == Cache Value ==
/// A value that can be stored in an [`EvictionCache`](super::EvictionCache).
///
/// Both methods have conservative defaults, so any cloneable type can opt in
/// with an empty impl. Such values are never measurable and never empty.
pub trait CacheValue: Clone + Send + Sync + 'static {
    /// Byte length of the value, or `None` if it cannot be measured.
    fn byte_size(&self) -> Option<usize> {
        None
    }

    /// Whether the value is present but holds nothing.
    fn is_empty_value(&self) -> bool {
        false
    }
}

impl CacheValue for String {
    fn byte_size(&self) -> Option<usize> {
        Some(self.len())
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl CacheValue for Arc<str> {
    fn byte_size(&self) -> Option<usize> {
        Some(self.len())
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl CacheValue for &'static str {
    fn byte_size(&self) -> Option<usize> {
        Some(self.len())
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl CacheValue for Vec<u8> {
    fn byte_size(&self) -> Option<usize> {
        Some(self.len())
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl CacheValue for Bytes {
    fn byte_size(&self) -> Option<usize> {
        Some(self.len())
    }

    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

macro_rules! unmeasured_value {
    ($($ty:ty),* $(,)?) => {
        $(impl CacheValue for $ty {})*
    };
}

unmeasured_value!(bool, i32, i64, u32, u64, usize, f64);

// == Cache Entry ==
/// A single stored value with its insertion metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Key the value is stored under
    pub key: String,
    /// The stored value
    pub value: V,
    /// When the value was added
    pub added_at: Instant,
    /// Measured size in bytes, 0 when size tracking is disabled
    pub byte_size: usize,
    /// Insertion sequence, breaks ties between equal timestamps
    pub(crate) seq: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    pub fn new(key: String, value: V, byte_size: usize, seq: u64) -> Self {
        Self {
            key,
            value,
            added_at: Instant::now(),
            byte_size,
            seq,
        }
    }

    // == Age ==
    /// Time elapsed between the entry being added and `now`.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.added_at)
    }

    /// Sort key giving oldest-first order.
    pub(crate) fn order(&self) -> (Instant, u64) {
        (self.added_at, self.seq)
    }
}

// == Utility Functions ==
/// Sums the byte size of entries, skipping any whose key is in `except`.
pub fn total_size<'a, V: 'a>(
    entries: impl IntoIterator<Item = &'a CacheEntry<V>>,
    except: &[String],
) -> usize {
    let except: HashSet<&str> = except.iter().map(String::as_str).collect();
    entries
        .into_iter()
        .filter(|entry| !except.contains(entry.key.as_str()))
        .map(|entry| entry.byte_size)
        .sum()
}
