//! Background Tasks Module
//!
//! Contains the timer tasks caches schedule for deferred maintenance.
//!
//! # Tasks
//! - Debounce: runs a prune pass once writes have been quiet for a delay

mod debounce;

pub use debounce::Debouncer;
