//! # Persistent Cache Store
//!
//! The slower fallback tier: cache entries serialized as JSON into any
//! key-value store satisfying the `StorageBackend` capability. The backend
//! is bounded; when a write is rejected with a quota failure the store
//! evicts the oldest quarter of its entries (ascending by creation time)
//! and retries the write once.

use super::{CacheEntry, CacheStore, CacheStoreStats, StorageBackend, StorageError};
use crate::caching::{CacheError, CacheResult};
use crate::core::clock::Clock;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fraction of entries removed when the backend reports a quota failure
const EVICTION_FRACTION: f64 = 0.25;

/// Persistent cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentCacheConfig {
    /// Key prefix for all cache entries written to the backend
    pub key_prefix: String,
}

impl Default for PersistentCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "coordinator:cache:".to_string(),
        }
    }
}

/// Persistent cache implementation over a storage backend
pub struct PersistentCache {
    /// Configuration
    config: PersistentCacheConfig,

    /// The injected key-value store
    backend: Arc<dyn StorageBackend>,

    /// Wall clock for expiry decisions
    clock: Arc<dyn Clock>,

    /// Statistics counters
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    expired_cleanups: Arc<AtomicU64>,
}

impl PersistentCache {
    /// Create a new persistent cache over the given backend
    pub fn new(
        config: PersistentCacheConfig,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            backend,
            clock,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            expired_cleanups: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the full backend key with prefix
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// List the backend keys belonging to this cache
    async fn own_keys(&self) -> Result<Vec<String>, StorageError> {
        let keys = self.backend.keys().await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.starts_with(&self.config.key_prefix))
            .collect())
    }

    /// Remove every entry carrying the given tag, returning how many were
    /// dropped. Requires a full scan; tags are stored inside each entry.
    pub async fn remove_by_tag(&self, tag: &str) -> CacheResult<usize> {
        let mut removed = 0;
        for full_key in self.own_keys().await.map_err(CacheError::from)? {
            let Some(bytes) = self.backend.get(&full_key).await.map_err(CacheError::from)? else {
                continue;
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) if entry.tags.iter().any(|t| t == tag) => {
                    self.backend
                        .delete(&full_key)
                        .await
                        .map_err(CacheError::from)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(_) => {
                    // Malformed entries are dead weight; drop them
                    let _ = self.backend.delete(&full_key).await;
                }
            }
        }

        if removed > 0 {
            debug!("Removed {} persistent entries tagged '{}'", removed, tag);
        }
        Ok(removed)
    }

    /// Evict the oldest quarter of entries, ascending by creation time
    async fn evict_oldest(&self) -> CacheResult<()> {
        let keys = self.own_keys().await.map_err(CacheError::from)?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut by_age: Vec<(String, u64)> = Vec::with_capacity(keys.len());
        for full_key in keys {
            match self.backend.get(&full_key).await.map_err(CacheError::from)? {
                Some(bytes) => match serde_json::from_slice::<CacheEntry>(&bytes) {
                    Ok(entry) => by_age.push((full_key, entry.created_at_ms)),
                    Err(_) => {
                        // Unparseable entries count as the oldest possible
                        by_age.push((full_key, 0));
                    }
                },
                None => {}
            }
        }

        by_age.sort_by_key(|(_, created_at_ms)| *created_at_ms);
        let evict_count = ((by_age.len() as f64 * EVICTION_FRACTION).ceil() as usize).max(1);

        let mut evicted = 0u64;
        for (full_key, _) in by_age.into_iter().take(evict_count) {
            if self
                .backend
                .delete(&full_key)
                .await
                .map_err(CacheError::from)?
            {
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        info!(
            "Evicted {} oldest persistent cache entries after quota failure",
            evicted
        );
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PersistentCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let full_key = self.full_key(key);

        let Some(bytes) = self.backend.get(&full_key).await.map_err(CacheError::from)? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Dropping unparseable persistent cache entry {}: {}", key, e);
                let _ = self.backend.delete(&full_key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if entry.is_expired(self.clock.now_millis()) {
            // Lazy purge on read
            let _ = self.backend.delete(&full_key).await;
            self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!("Persistent cache hit for key: {}", key);
        Ok(Some(entry))
    }

    async fn set(&self, entry: CacheEntry) -> CacheResult<()> {
        let full_key = self.full_key(&entry.key);
        let bytes = serde_json::to_vec(&entry)?;

        match self.backend.set(&full_key, &bytes).await {
            Ok(()) => Ok(()),
            Err(StorageError::QuotaExceeded) => {
                warn!(
                    "Persistent tier quota exceeded writing {}; evicting oldest entries",
                    entry.key
                );
                self.evict_oldest().await?;

                self.backend
                    .set(&full_key, &bytes)
                    .await
                    .map_err(|e| match e {
                        StorageError::QuotaExceeded => CacheError::capacity(format!(
                            "write for {} rejected after eviction",
                            entry.key
                        )),
                        other => CacheError::from(other),
                    })
            }
            Err(other) => Err(CacheError::from(other)),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.full_key(key);
        self.backend
            .delete(&full_key)
            .await
            .map_err(CacheError::from)
    }

    async fn clear(&self) -> CacheResult<()> {
        let keys = self.own_keys().await.map_err(CacheError::from)?;
        let count = keys.len();
        for full_key in keys {
            self.backend
                .delete(&full_key)
                .await
                .map_err(CacheError::from)?;
        }

        info!("Cleared {} entries from persistent cache", count);
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStoreStats> {
        let entries = self.own_keys().await.map_err(CacheError::from)?.len();

        Ok(CacheStoreStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        })
    }
}

/// Bounded in-memory storage backend
///
/// Useful for tests and for hosts that want the layered cache semantics
/// without durable storage. The quota counts key and value bytes.
#[derive(Debug)]
pub struct MemoryBackend {
    max_bytes: usize,
    used_bytes: AtomicU64,
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create a backend bounded at `max_bytes` of key + value data
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            used_bytes: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Bytes currently stored
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed) as usize
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.write();

        let old_len = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        let new_len = key.len() + value.len();
        let used = self.used_bytes.load(Ordering::Relaxed) as usize;
        let projected = used - old_len + new_len;

        if projected > self.max_bytes {
            return Err(StorageError::QuotaExceeded);
        }

        entries.insert(key.to_string(), value.to_vec());
        self.used_bytes.store(projected as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.write();
        if let Some(value) = entries.remove(key) {
            let freed = (key.len() + value.len()) as u64;
            self.used_bytes.fetch_sub(freed, Ordering::Relaxed);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
