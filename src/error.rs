//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and its operation queues.
///
/// Cloneable so that a single settlement can be delivered to every caller
/// waiting on the same key.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The in-flight operation for a key was cancelled before it settled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// The queued operation (loader, compressor) failed
    #[error("Operation failed for {key}: {reason}")]
    Operation {
        key: String,
        reason: Arc<anyhow::Error>,
    },

    /// Stored bytes could not be decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    // == Constructors ==
    /// Wraps an operation failure for `key`.
    pub fn operation(key: impl Into<String>, reason: anyhow::Error) -> Self {
        CacheError::Operation {
            key: key.into(),
            reason: Arc::new(reason),
        }
    }

    // == Classification ==
    /// Whether the error is a deliberate cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinct_from_failure() {
        let cancelled = CacheError::Cancelled("k".to_string());
        let failed = CacheError::operation("k", anyhow::anyhow!("boom"));

        assert!(cancelled.is_cancelled());
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_operation_error_display() {
        let err = CacheError::operation("page", anyhow::anyhow!("not reachable"));
        assert_eq!(err.to_string(), "Operation failed for page: not reachable");

        // clones share the underlying reason
        let copy = err.clone();
        assert_eq!(copy.to_string(), err.to_string());
    }
}
