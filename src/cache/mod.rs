//! Cache Module
//!
//! Provides the policy-evicting key/value store and its compressing text
//! variant.

mod compress;
mod entry;
mod policy;
mod stats;
mod store;


// Re-export public types
pub use compress::{CompressingCache, CompressingCacheBuilder};
pub use entry::{total_size, CacheEntry, CacheValue};
pub use policy::EvictionPolicy;
pub use stats::CacheStats;
pub use store::EvictionCache;
