//! # Tiered Cache
//!
//! Coordinates the in-memory structured tier and the persistent tier behind
//! a single interface. Reads try memory first and backfill it from the
//! persistent tier with the entry's remaining TTL; writes go to both tiers.
//!
//! Caching is an optimization: every store failure on the read path degrades
//! to a miss, and persistent-tier write failures (including capacity
//! exhaustion after eviction) are logged and dropped without reaching the
//! caller.

use super::stores::{CacheEntry, CacheStore, CacheStoreStats, InMemoryCache, PersistentCache};
use super::CacheResult;
use crate::core::clock::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Aggregate cache statistics across both tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits (either tier)
    pub hits: u64,

    /// Total cache misses
    pub misses: u64,

    /// Cache hit ratio
    pub hit_ratio: f64,

    /// Memory tier statistics
    pub memory: CacheStoreStats,

    /// Persistent tier statistics, when the tier is enabled
    pub persistent: Option<CacheStoreStats>,

    /// Statistics collection start time
    pub start_time: chrono::DateTime<chrono::Utc>,
}

/// Two-tier cache store
pub struct TieredCache {
    /// In-memory structured tier (fast path)
    memory: Arc<InMemoryCache>,

    /// Persistent tier (fallback), absent when disabled
    persistent: Option<Arc<PersistentCache>>,

    /// Wall clock shared with the stores
    clock: Arc<dyn Clock>,

    /// Aggregate counters
    hits: AtomicU64,
    misses: AtomicU64,

    start_time: chrono::DateTime<chrono::Utc>,
}

impl TieredCache {
    /// Create a tiered cache over the given stores
    pub fn new(
        memory: Arc<InMemoryCache>,
        persistent: Option<Arc<PersistentCache>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memory,
            persistent,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            start_time: chrono::Utc::now(),
        }
    }

    /// Get a cached value if present and unexpired.
    ///
    /// This is the façade's hot path: a memory-tier hit involves one
    /// concurrent-map lookup. Store errors degrade to a miss.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.memory.get(key).await {
            Ok(Some(entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit in memory tier for key: {}", key);
                return Some(entry.value);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Memory tier error for key {}: {}", key, e);
            }
        }

        if let Some(persistent) = &self.persistent {
            match persistent.get(key).await {
                Ok(Some(entry)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit in persistent tier for key: {}", key);

                    // Backfill the memory tier with the remaining lifetime so
                    // the entry does not outlive its original expiry
                    let remaining = entry.remaining_ttl(self.clock.now_millis());
                    if !remaining.is_zero() {
                        let backfill = CacheEntry::new(
                            entry.key.clone(),
                            entry.value.clone(),
                            entry.tags.clone(),
                            remaining,
                            self.clock.now_millis(),
                        );
                        if let Err(e) = self.memory.set(backfill).await {
                            warn!("Failed to backfill memory tier for key {}: {}", key, e);
                        }
                    }

                    return Some(entry.value);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Persistent tier error for key {}: {}", key, e);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write a value to both tiers with the given TTL.
    ///
    /// A TTL of zero means "never cache" and short-circuits to a no-op.
    /// Persistent-tier failures are soft: logged, never surfaced.
    pub async fn put(&self, key: &str, value: Value, ttl: Duration, tags: Vec<String>) {
        if ttl.is_zero() {
            debug!("Skipping cache write for key {} (zero TTL)", key);
            return;
        }

        let entry = CacheEntry::new(
            key.to_string(),
            value,
            tags,
            ttl,
            self.clock.now_millis(),
        );

        if let Err(e) = self.memory.set(entry.clone()).await {
            warn!("Memory tier write failed for key {}: {}", key, e);
        }

        if let Some(persistent) = &self.persistent {
            if let Err(e) = persistent.set(entry).await {
                // Includes capacity exhaustion after the eviction retry: the
                // caller already has the value, so the put is simply dropped
                warn!("Persistent tier write dropped for key {}: {}", key, e);
            }
        }

        debug!("Cached key {} with TTL {:?}", key, ttl);
    }

    /// Query valid memory-tier entries matching any of the given tags
    pub fn query_by_tag(&self, tags: &[&str], max_age: Option<Duration>) -> Vec<CacheEntry> {
        self.memory.query_by_tag(tags, max_age)
    }

    /// Remove every entry carrying the given tag from both tiers, returning
    /// how many memory-tier entries were dropped
    pub async fn remove_by_tag(&self, tag: &str) -> CacheResult<usize> {
        let removed = self.memory.remove_by_tag(tag);

        if let Some(persistent) = &self.persistent {
            persistent.remove_by_tag(tag).await?;
        }

        Ok(removed)
    }

    /// Remove every entry from both tiers
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.memory.clear().await?;

        if let Some(persistent) = &self.persistent {
            persistent.clear().await?;
        }

        info!("All cache tiers cleared");
        Ok(())
    }

    /// Aggregate cache statistics
    pub async fn stats(&self) -> CacheStats {
        let memory = self.memory.stats().await.unwrap_or_default();
        let persistent = match &self.persistent {
            Some(p) => p.stats().await.ok(),
            None => None,
        };

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let operations = hits + misses;
        let hit_ratio = if operations > 0 {
            hits as f64 / operations as f64
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            hit_ratio,
            memory,
            persistent,
            start_time: self.start_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::{
        InMemoryCacheConfig, MemoryBackend, PersistentCacheConfig, StorageBackend,
    };
    use crate::core::clock::ManualClock;
    use serde_json::json;

    fn make_tiered() -> (TieredCache, Arc<ManualClock>, Arc<MemoryBackend>) {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::default());
        let backend = Arc::new(MemoryBackend::new(1024 * 1024));

        let memory = Arc::new(InMemoryCache::new(
            InMemoryCacheConfig::default(),
            clock.clone(),
        ));
        let persistent = Arc::new(PersistentCache::new(
            PersistentCacheConfig::default(),
            backend.clone(),
            clock.clone(),
        ));

        (
            TieredCache::new(memory, Some(persistent), clock.clone()),
            clock,
            backend,
        )
    }

    #[tokio::test]
    async fn test_put_and_get_roundtrip() {
        let (cache, _clock, _) = make_tiered();

        cache
            .put(
                "k1",
                json!({"trend": "up"}),
                Duration::from_secs(60),
                vec!["market-trends".to_string()],
            )
            .await;

        assert_eq!(cache.get("k1").await, Some(json!({"trend": "up"})));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_caches() {
        let (cache, _clock, backend) = make_tiered();

        cache
            .put("k1", json!(1), Duration::ZERO, vec![])
            .await;

        assert_eq!(cache.get("k1").await, None);
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_fallback_backfills_memory() {
        let (cache, clock, _) = make_tiered();

        cache
            .put("k1", json!("v"), Duration::from_secs(100), vec![])
            .await;

        // Simulate a cold memory tier (e.g. after restart)
        cache.memory.clear().await.unwrap();
        assert!(cache.memory.get("k1").await.unwrap().is_none());

        clock.advance(Duration::from_secs(40));
        assert_eq!(cache.get("k1").await, Some(json!("v")));

        // Backfilled into memory with the remaining lifetime, so it expires
        // at the original horizon, not 100s from the backfill
        let backfilled = cache.memory.get("k1").await.unwrap().unwrap();
        assert_eq!(
            backfilled.remaining_ttl(clock.now_millis()),
            Duration::from_secs(60)
        );

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get("k1").await, None);
    }

    #[tokio::test]
    async fn test_expiry_applies_across_tiers() {
        let (cache, clock, _) = make_tiered();

        cache
            .put("k1", json!("v"), Duration::from_secs(10), vec![])
            .await;

        clock.advance(Duration::from_secs(11));
        assert_eq!(cache.get("k1").await, None);
    }

    #[tokio::test]
    async fn test_remove_by_tag_hits_both_tiers() {
        let (cache, _clock, backend) = make_tiered();

        cache
            .put(
                "k1",
                json!(1),
                Duration::from_secs(60),
                vec!["reddit-sentiment".to_string()],
            )
            .await;
        cache
            .put(
                "k2",
                json!(2),
                Duration::from_secs(60),
                vec!["market-trends".to_string()],
            )
            .await;

        let removed = cache.remove_by_tag("reddit-sentiment").await.unwrap();
        assert_eq!(removed, 1);

        assert_eq!(cache.get("k1").await, None);
        assert_eq!(cache.get("k2").await, Some(json!(2)));
        assert_eq!(backend.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (cache, _clock, backend) = make_tiered();

        cache
            .put("k1", json!(1), Duration::from_secs(60), vec![])
            .await;
        cache.clear_all().await.unwrap();

        assert_eq!(cache.get("k1").await, None);
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_only_mode() {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::default());
        let memory = Arc::new(InMemoryCache::new(
            InMemoryCacheConfig::default(),
            clock.clone(),
        ));
        let cache = TieredCache::new(memory, None, clock.clone());

        cache
            .put("k1", json!(1), Duration::from_secs(60), vec![])
            .await;
        assert_eq!(cache.get("k1").await, Some(json!(1)));

        let stats = cache.stats().await;
        assert!(stats.persistent.is_none());
    }
}
