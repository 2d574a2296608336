//! # Request Coordinator Façade
//!
//! The single public entry point for outbound calls. `invoke` composes the
//! layers below it: compute fingerprint → check cache → check in-flight
//! table → else enqueue on the scheduler → store result → return.
//!
//! ## Guarantees
//! - At most one upstream execution per fingerprint is ever in flight,
//!   regardless of how many callers ask concurrently
//! - Upstream dispatches respect the scheduler's minimum spacing
//! - Successful results are cached with the endpoint's TTL policy; failures
//!   are propagated to every awaiter and never cached
//!
//! The upstream collaborator is injected at construction. An admitted call
//! always runs to completion and is cached even when every caller stops
//! awaiting, so late arrivals still benefit.

pub mod fingerprint;
pub mod in_flight;

pub use fingerprint::Fingerprint;
pub use in_flight::{InFlightTable, SharedOutcome};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::caching::stores::{InMemoryCacheConfig, PersistentCacheConfig};
use crate::caching::{
    CacheEntry, CacheResult, CacheStats, InMemoryCache, PersistentCache, StorageBackend,
    TieredCache, TtlPolicy,
};
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::CoordinatorConfig;
use crate::core::error::{CoordinatorError, CoordinatorResult};
use crate::scheduler::{RequestScheduler, SchedulerConfig, SchedulerStats};

/// The upstream call collaborator, supplied by the host application
///
/// The coordinator treats it as an opaque asynchronous operation producing
/// a JSON result. Retry policy, if any, belongs to the host.
#[async_trait]
pub trait UpstreamCall: Send + Sync {
    /// Perform the real outbound call for a logical endpoint
    async fn call(&self, endpoint: &str, payload: &Value) -> CoordinatorResult<Value>;
}

/// Combined statistics snapshot for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStats {
    /// Aggregate cache statistics across both tiers
    pub cache: CacheStats,

    /// Scheduler counters
    pub scheduler: SchedulerStats,

    /// Fingerprints currently in flight
    pub in_flight: usize,
}

/// The request coordinator: scheduler + layered cache + deduplication
///
/// One instance per process, constructed at startup and shared by `Arc`.
pub struct RequestCoordinator {
    scheduler: Arc<RequestScheduler>,
    cache: Arc<TieredCache>,
    in_flight: Arc<InFlightTable>,
    ttl_policy: Arc<TtlPolicy>,
    upstream: Arc<dyn UpstreamCall>,
}

impl RequestCoordinator {
    /// Create a coordinator using the system wall clock.
    ///
    /// `backend` is required when the configuration enables the persistent
    /// tier; pass `None` together with `persistent.enabled: false` for a
    /// memory-only cache.
    pub fn new(
        config: CoordinatorConfig,
        upstream: Arc<dyn UpstreamCall>,
        backend: Option<Arc<dyn StorageBackend>>,
    ) -> CoordinatorResult<Self> {
        Self::with_clock(config, upstream, backend, Arc::new(SystemClock))
    }

    /// Create a coordinator with an injected clock (tests use a manual one
    /// to cross TTL horizons without sleeping)
    pub fn with_clock(
        config: CoordinatorConfig,
        upstream: Arc<dyn UpstreamCall>,
        backend: Option<Arc<dyn StorageBackend>>,
        clock: Arc<dyn Clock>,
    ) -> CoordinatorResult<Self> {
        config.validate()?;
        let ttl_policy = config.ttl_policy()?;

        let scheduler = Arc::new(RequestScheduler::new(SchedulerConfig {
            min_spacing: config.min_spacing,
            max_concurrent: config.max_concurrent,
        }));

        let memory = Arc::new(InMemoryCache::new(
            InMemoryCacheConfig {
                max_entries: config.memory.max_entries,
                cleanup_interval: config.memory.cleanup_interval,
            },
            clock.clone(),
        ));

        let persistent = if config.persistent.enabled {
            let backend = backend.ok_or_else(|| {
                CoordinatorError::config(
                    "persistent tier is enabled but no storage backend was supplied",
                )
            })?;
            Some(Arc::new(PersistentCache::new(
                PersistentCacheConfig {
                    key_prefix: config.persistent.key_prefix.clone(),
                },
                backend,
                clock.clone(),
            )))
        } else {
            None
        };

        let cache = Arc::new(TieredCache::new(memory, persistent, clock));

        info!(
            "Request coordinator initialized (spacing {:?}, max_concurrent {}, {} TTL overrides)",
            config.min_spacing,
            config.max_concurrent,
            ttl_policy.len()
        );

        Ok(Self {
            scheduler,
            cache,
            in_flight: Arc::new(InFlightTable::new()),
            ttl_policy: Arc::new(ttl_policy),
            upstream,
        })
    }

    /// Invoke a logical endpoint with a payload.
    ///
    /// Returns the cached result when fresh, attaches to an identical
    /// in-flight call when one exists, and otherwise enqueues the upstream
    /// call on the paced scheduler. Payloads that cannot be canonicalized
    /// fail fast without touching the queue.
    pub async fn invoke<T: Serialize>(
        &self,
        endpoint: &str,
        payload: T,
    ) -> CoordinatorResult<Value> {
        let (fingerprint, payload) = Fingerprint::try_compute(endpoint, &payload)?;

        // Hot path: fresh cache entry, no scheduler involvement
        if let Some(value) = self.cache.get(fingerprint.as_str()).await {
            return Ok(value);
        }

        let (outcome, leader) = self
            .in_flight
            .join_or_insert(fingerprint.as_str(), || {
                self.lead_call(endpoint.to_string(), payload, fingerprint.clone())
            });

        if leader {
            debug!("Enqueued upstream call for {}", fingerprint);
        } else {
            debug!("Joined in-flight call for {}", fingerprint);
        }

        outcome.await
    }

    /// Enqueue the real upstream call and return its shared outcome.
    ///
    /// The work closure runs inside the scheduler's drain task, so the
    /// cache write and in-flight removal happen exactly once and complete
    /// even if every awaiter abandons interest.
    fn lead_call(&self, endpoint: String, payload: Value, fingerprint: Fingerprint) -> SharedOutcome {
        let ttl = self.ttl_policy.lookup(&endpoint);
        let upstream = self.upstream.clone();
        let cache = self.cache.clone();
        let in_flight = self.in_flight.clone();

        let receiver = self.scheduler.submit(move || async move {
            let result = upstream.call(&endpoint, &payload).await;

            match &result {
                Ok(value) => {
                    // Cache before dropping the in-flight entry, so a caller
                    // arriving in between hits one of the two
                    cache
                        .put(fingerprint.as_str(), value.clone(), ttl, vec![endpoint])
                        .await;
                    in_flight.remove(fingerprint.as_str());
                }
                Err(e) => {
                    warn!("Upstream call for {} failed: {}", fingerprint, e);
                    in_flight.remove(fingerprint.as_str());
                }
            }

            result
        });

        async move {
            match receiver.await {
                Ok(outcome) => outcome,
                Err(_) => Err(CoordinatorError::internal(
                    "scheduler dropped the request before settlement",
                )),
            }
        }
        .boxed()
        .shared()
    }

    /// Valid cached entries for a logical endpoint from the structured
    /// tier, optionally bounded by age
    pub fn cached_entries(&self, endpoint: &str, max_age: Option<Duration>) -> Vec<CacheEntry> {
        self.cache.query_by_tag(&[endpoint], max_age)
    }

    /// Drop every cached entry for a logical endpoint, in both tiers.
    /// In-flight calls are unaffected and will re-cache on settlement.
    pub async fn invalidate_endpoint(&self, endpoint: &str) -> CoordinatorResult<usize> {
        let removed = self.cache.remove_by_tag(endpoint).await?;
        info!("Invalidated {} cached entries for endpoint {}", removed, endpoint);
        Ok(removed)
    }

    /// Remove every entry from both cache tiers (user-triggered refresh)
    pub async fn clear_cache(&self) -> CacheResult<()> {
        self.cache.clear_all().await
    }

    /// Change the scheduler spacing for subsequent dispatches. Intended for
    /// tests and ops tooling; not retroactive.
    pub fn set_min_spacing(&self, min_spacing: Duration) {
        self.scheduler.set_min_spacing(min_spacing);
    }

    /// The TTL policy table in use
    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl_policy
    }

    /// Combined statistics snapshot
    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            cache: self.cache.stats().await,
            scheduler: self.scheduler.stats(),
            in_flight: self.in_flight.len(),
        }
    }
}
