//! Compress Cache - an in-memory cache with policy-based eviction
//!
//! Provides an eviction cache pruned by item count, age and byte size, a
//! compressing text cache with optional auto-loading, and the single-flight
//! operation queue both rely on to avoid duplicate work.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod queue;
pub mod tasks;

pub use cache::{CompressingCache, EvictionCache, EvictionPolicy};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use events::{CacheEvent, CacheEventKind, EventBus, QueueEvent, QueueEventKind};
pub use queue::OperationQueue;
