//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::EvictionPolicy;

/// Default delay between the last write and the prune pass it schedules.
pub const DEFAULT_PRUNE_DELAY_MS: u64 = 10;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// A threshold of `0` disables it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before the oldest are evicted
    pub max_items: usize,
    /// Maximum entry age in milliseconds
    pub max_age_ms: u64,
    /// Maximum aggregate byte size of stored values
    pub max_bytes: usize,
    /// Debounce delay in milliseconds before a prune pass runs
    pub prune_delay_ms: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ITEMS` - Maximum entries (default: 0, disabled)
    /// - `CACHE_MAX_AGE_MS` - Maximum age in milliseconds (default: 0, disabled)
    /// - `CACHE_MAX_BYTES` - Maximum total bytes (default: 0, disabled)
    /// - `CACHE_PRUNE_DELAY_MS` - Prune debounce delay (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_items: env_or("CACHE_MAX_ITEMS", defaults.max_items),
            max_age_ms: env_or("CACHE_MAX_AGE_MS", defaults.max_age_ms),
            max_bytes: env_or("CACHE_MAX_BYTES", defaults.max_bytes),
            prune_delay_ms: env_or("CACHE_PRUNE_DELAY_MS", defaults.prune_delay_ms),
        }
    }

    /// Eviction policy described by this configuration.
    pub fn policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_items: self.max_items,
            max_age_ms: self.max_age_ms,
            max_bytes: self.max_bytes,
        }
    }

    /// Prune debounce delay as a Duration.
    pub fn prune_delay(&self) -> Duration {
        Duration::from_millis(self.prune_delay_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 0,
            max_age_ms: 0,
            max_bytes: 0,
            prune_delay_ms: DEFAULT_PRUNE_DELAY_MS,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
