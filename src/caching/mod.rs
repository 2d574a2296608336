//! # Caching System Module
//!
//! This module provides the layered response cache for the coordinator. It
//! is split across two tiers with per-endpoint TTL policies:
//!
//! 1. **In-memory structured tier**: fast path, queryable by tag for
//!    topic-based invalidation
//! 2. **Persistent tier**: a bounded key-value store behind the
//!    `StorageBackend` capability, with oldest-first eviction when the
//!    backend reports a quota failure
//!
//! ## Architecture
//! - **Tiered Cache**: coordinates reads/writes across both tiers
//! - **Cache Stores**: in-memory and persistent implementations
//! - **TTL Policy**: per-endpoint freshness durations with a default
//!
//! Caching is an optimization, not a correctness requirement: write failures
//! in the persistent tier are downgraded to warnings, and read failures
//! degrade to a miss.

pub mod stores;
pub mod tiered;
pub mod ttl_policy;

pub use stores::{
    CacheEntry, CacheStore, CacheStoreStats, FsBackend, InMemoryCache, MemoryBackend,
    PersistentCache, StorageBackend, StorageError,
};
pub use tiered::{CacheStats, TieredCache};
pub use ttl_policy::TtlPolicy;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
///
/// String-message variants keep the type `Clone`, which the in-flight
/// deduplication layer requires of every settled outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Persistent tier write failed after eviction: {message}")]
    Capacity { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },
}

impl CacheError {
    /// Create a store error with a custom message
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a capacity error with a custom message
    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::Capacity {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QuotaExceeded => Self::capacity("storage quota exceeded"),
            StorageError::Backend { message } => Self::Store { message },
        }
    }
}
