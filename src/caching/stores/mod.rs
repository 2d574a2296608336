//! # Cache Stores Module
//!
//! This module provides the cache store implementations for both tiers and
//! the storage-backend capability the persistent tier is built on.

pub mod fs_backend;
pub mod memory;
pub mod persistent;

pub use fs_backend::FsBackend;
pub use memory::{InMemoryCache, InMemoryCacheConfig};
pub use persistent::{MemoryBackend, PersistentCache, PersistentCacheConfig};

use super::CacheResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache entry with metadata
///
/// Entries are replaced, never edited: a fresh call for the same key
/// overwrites the whole entry. The value is opaque to the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The fingerprint this entry is stored under
    pub key: String,

    /// The cached result payload
    pub value: serde_json::Value,

    /// Tags for topic-based queries and invalidation (the façade tags each
    /// entry with its endpoint name)
    pub tags: Vec<String>,

    /// When the entry was created (Unix milliseconds)
    pub created_at_ms: u64,

    /// When the entry expires (Unix milliseconds)
    pub expires_at_ms: u64,
}

impl CacheEntry {
    /// Create a new cache entry expiring `ttl` after `now_ms`
    pub fn new(
        key: String,
        value: serde_json::Value,
        tags: Vec<String>,
        ttl: Duration,
        now_ms: u64,
    ) -> Self {
        Self {
            key,
            value,
            tags,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl.as_millis() as u64),
        }
    }

    /// An entry is valid iff `now < expires_at`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Age of the entry at `now_ms`
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.created_at_ms))
    }

    /// Time until expiration at `now_ms`; zero once expired
    pub fn remaining_ttl(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at_ms.saturating_sub(now_ms))
    }
}

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a valid entry from the store. Stale entries are purged lazily and
    /// reported as a miss.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Insert or replace an entry
    async fn set(&self, entry: CacheEntry) -> CacheResult<()>;

    /// Delete an entry, returning whether it was present
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry from the store
    async fn clear(&self) -> CacheResult<()>;

    /// Get store statistics
    async fn stats(&self) -> CacheResult<CacheStoreStats>;
}

/// Cache store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStoreStats {
    /// Number of entries
    pub entries: usize,

    /// Number of hits
    pub hits: u64,

    /// Number of misses
    pub misses: u64,

    /// Number of capacity-driven evictions
    pub evictions: u64,

    /// Number of expired entries purged
    pub expired_cleanups: u64,
}

/// Storage error reported by a `StorageBackend`
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The backend is out of space or quota; the persistent tier responds by
    /// evicting its oldest entries and retrying once
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// Any other backend failure
    #[error("Storage backend error: {message}")]
    Backend { message: String },
}

impl StorageError {
    /// Create a backend error with a custom message
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Key-value storage capability backing the persistent cache tier
///
/// Any store with get/set/delete/keys semantics and a detectable
/// quota-exceeded failure mode can satisfy this: a file tree, an embedded
/// KV store, a remote cache. Supplied by the host by injection.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the raw bytes stored under a key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write raw bytes under a key, replacing any previous value.
    /// Must return `StorageError::QuotaExceeded` when out of space.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key, returning whether it was present
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List every stored key
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}
