//! # In-Memory Cache Store
//!
//! The structured fast tier: a concurrent map with per-entry TTL, lazy
//! expiry purge on read, a periodic cleanup task, and a tag index that
//! supports topic-based queries and invalidation.

use super::{CacheEntry, CacheStore, CacheStoreStats};
use crate::caching::CacheResult;
use crate::core::clock::Clock;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// When the entry cap is hit, the oldest tenth of entries is dropped so a
/// burst of inserts does not evict one-by-one.
const EVICT_BATCH_FRACTION: f64 = 0.10;

/// In-memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,

    /// Cleanup interval for expired entries
    pub cleanup_interval: Duration,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    /// Configuration
    config: InMemoryCacheConfig,

    /// Cache entries storage
    entries: Arc<DashMap<String, CacheEntry>>,

    /// Tag index: tag -> keys carrying that tag
    tag_index: Arc<RwLock<HashMap<String, HashSet<String>>>>,

    /// Wall clock for expiry decisions
    clock: Arc<dyn Clock>,

    /// Statistics counters
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
    expired_cleanups: Arc<AtomicU64>,

    /// Cleanup task handle; aborted when the cache is dropped
    cleanup_task: tokio::task::JoinHandle<()>,
}

impl InMemoryCache {
    /// Create a new in-memory cache. Must be called from within a tokio
    /// runtime because it spawns the periodic cleanup task.
    pub fn new(config: InMemoryCacheConfig, clock: Arc<dyn Clock>) -> Self {
        let entries: Arc<DashMap<String, CacheEntry>> = Arc::new(DashMap::new());
        let tag_index: Arc<RwLock<HashMap<String, HashSet<String>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let expired_cleanups = Arc::new(AtomicU64::new(0));

        let cleanup_task = {
            let entries = entries.clone();
            let tag_index = tag_index.clone();
            let expired_cleanups = expired_cleanups.clone();
            let clock = clock.clone();
            let cleanup_interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut interval = interval(cleanup_interval);
                // The first tick fires immediately; skip it
                interval.tick().await;
                loop {
                    interval.tick().await;
                    Self::purge_expired(&entries, &tag_index, &expired_cleanups, clock.now_millis());
                }
            })
        };

        Self {
            config,
            entries,
            tag_index,
            clock,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
            expired_cleanups,
            cleanup_task,
        }
    }

    /// Query valid entries matching any of the given tags, optionally
    /// bounded by age
    pub fn query_by_tag(&self, tags: &[&str], max_age: Option<Duration>) -> Vec<CacheEntry> {
        let now_ms = self.clock.now_millis();
        let keys: HashSet<String> = {
            let index = self.tag_index.read();
            tags.iter()
                .filter_map(|tag| index.get(*tag))
                .flatten()
                .cloned()
                .collect()
        };

        let mut results = Vec::new();
        for key in keys {
            if let Some(entry) = self.entries.get(&key) {
                if entry.is_expired(now_ms) {
                    continue;
                }
                if let Some(max_age) = max_age {
                    if entry.age(now_ms) > max_age {
                        continue;
                    }
                }
                results.push(entry.clone());
            }
        }

        results
    }

    /// Remove every entry carrying the given tag, returning how many were
    /// dropped
    pub fn remove_by_tag(&self, tag: &str) -> usize {
        let keys: Vec<String> = {
            let mut index = self.tag_index.write();
            index
                .remove(tag)
                .map(|keys| keys.into_iter().collect())
                .unwrap_or_default()
        };

        let mut removed = 0;
        for key in &keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                self.unindex(&entry);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Removed {} entries tagged '{}'", removed, tag);
        }
        removed
    }

    /// Current number of entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index(&self, key: &str, tags: &[String]) {
        if tags.is_empty() {
            return;
        }
        let mut index = self.tag_index.write();
        for tag in tags {
            index
                .entry(tag.clone())
                .or_insert_with(HashSet::new)
                .insert(key.to_string());
        }
    }

    fn unindex(&self, entry: &CacheEntry) {
        if entry.tags.is_empty() {
            return;
        }
        let mut index = self.tag_index.write();
        for tag in &entry.tags {
            if let Some(keys) = index.get_mut(tag) {
                keys.remove(&entry.key);
                if keys.is_empty() {
                    index.remove(tag);
                }
            }
        }
    }

    fn purge_expired(
        entries: &DashMap<String, CacheEntry>,
        tag_index: &RwLock<HashMap<String, HashSet<String>>>,
        expired_cleanups: &AtomicU64,
        now_ms: u64,
    ) {
        let expired_keys: Vec<String> = entries
            .iter()
            .filter(|entry| entry.value().is_expired(now_ms))
            .map(|entry| entry.key().clone())
            .collect();

        let mut cleaned = 0u64;
        for key in expired_keys {
            if let Some((_, entry)) = entries.remove(&key) {
                let mut index = tag_index.write();
                for tag in &entry.tags {
                    if let Some(keys) = index.get_mut(tag) {
                        keys.remove(&entry.key);
                        if keys.is_empty() {
                            index.remove(tag);
                        }
                    }
                }
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            expired_cleanups.fetch_add(cleaned, Ordering::Relaxed);
            debug!("Purged {} expired in-memory cache entries", cleaned);
        }
    }

    /// Drop the oldest entries when the cap is reached
    fn evict_if_needed(&self) {
        if self.entries.len() < self.config.max_entries {
            return;
        }

        let batch = ((self.config.max_entries as f64 * EVICT_BATCH_FRACTION).ceil() as usize).max(1);

        let mut by_age: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().created_at_ms))
            .collect();
        by_age.sort_by_key(|(_, created_at_ms)| *created_at_ms);

        let mut evicted = 0u64;
        for (key, _) in by_age.into_iter().take(batch) {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.unindex(&entry);
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        info!("Evicted {} oldest in-memory cache entries", evicted);
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        self.cleanup_task.abort();
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let now_ms = self.clock.now_millis();

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now_ms) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            // Lazy purge on read
            if let Some((_, entry)) = self.entries.remove(key) {
                self.unindex(&entry);
                self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, entry: CacheEntry) -> CacheResult<()> {
        self.evict_if_needed();

        let key = entry.key.clone();
        let tags = entry.tags.clone();

        // Unindex the replaced entry before indexing the new tags, so a
        // shared tag is not torn out from under the fresh entry
        if let Some(old_entry) = self.entries.insert(key.clone(), entry) {
            self.unindex(&old_entry);
        }
        self.index(&key, &tags);

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.unindex(&entry);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let entry_count = self.entries.len();
        self.entries.clear();
        self.tag_index.write().clear();

        info!("Cleared {} entries from in-memory cache", entry_count);
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStoreStats> {
        Ok(CacheStoreStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        })
    }
}
