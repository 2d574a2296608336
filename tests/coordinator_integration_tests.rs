//! # Coordinator Integration Tests
//!
//! End-to-end tests for the scheduler + cache + deduplication contract:
//! spacing, dedup, cache idempotence, TTL expiry, and eviction under
//! pressure.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use upstream_coordinator::{
    CoordinatorConfig, CoordinatorError, CoordinatorResult, FsBackend, ManualClock, MemoryBackend,
    RequestCoordinator, UpstreamCall,
};

/// Counting upstream double with a configurable artificial latency
struct MockUpstream {
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
    dispatch_times: parking_lot::Mutex<Vec<Instant>>,
}

impl MockUpstream {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            fail: false,
            dispatch_times: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
            fail: true,
            dispatch_times: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn dispatch_times(&self) -> Vec<Instant> {
        self.dispatch_times.lock().clone()
    }
}

#[async_trait]
impl UpstreamCall for MockUpstream {
    async fn call(&self, endpoint: &str, payload: &Value) -> CoordinatorResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dispatch_times.lock().push(Instant::now());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail {
            return Err(CoordinatorError::upstream(endpoint, "service unavailable"));
        }
        Ok(json!({"endpoint": endpoint, "echo": payload}))
    }
}

fn config_with_spacing(min_spacing: Duration) -> CoordinatorConfig {
    CoordinatorConfig {
        min_spacing,
        ..Default::default()
    }
}

fn build(
    config: CoordinatorConfig,
    upstream: Arc<MockUpstream>,
) -> (Arc<RequestCoordinator>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let backend = Arc::new(MemoryBackend::new(1024 * 1024));
    let coordinator =
        RequestCoordinator::with_clock(config, upstream, Some(backend), clock.clone()).unwrap();
    (Arc::new(coordinator), clock)
}

#[tokio::test(start_paused = true)]
async fn test_spacing_invariant_across_distinct_requests() {
    let upstream = MockUpstream::new();
    let (coordinator, _clock) =
        build(config_with_spacing(Duration::from_millis(1000)), upstream.clone());

    // Three distinct-fingerprint requests submitted at t=0
    let submitted_at = Instant::now();
    let (a, b, c) = tokio::join!(
        coordinator.invoke("search", json!({"q": "a"})),
        coordinator.invoke("search", json!({"q": "b"})),
        coordinator.invoke("search", json!({"q": "c"})),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    // Dispatch times approximately t=0, t>=1000, t>=2000
    let starts = upstream.dispatch_times();
    assert_eq!(starts.len(), 3);
    assert!(starts[1] - starts[0] >= Duration::from_millis(1000));
    assert!(starts[2] - starts[1] >= Duration::from_millis(1000));
    assert!(starts[2] - submitted_at >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_dedup_invariant_concurrent_identical_invokes() {
    let upstream = MockUpstream::with_delay(Duration::from_millis(100));
    let (coordinator, _clock) =
        build(config_with_spacing(Duration::from_millis(10)), upstream.clone());

    // Five concurrent callers with the same fingerprint before any settles
    let mut handles = Vec::new();
    for _ in 0..5 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .invoke("market-trends", json!({"idea": "X"}))
                .await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    // The upstream executed exactly once and every caller got the same value
    assert_eq!(upstream.call_count(), 1);
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }

    // The in-flight table drained once the call settled
    assert_eq!(coordinator.stats().await.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_error_fans_out_to_all_awaiters_and_is_not_cached() {
    let upstream = MockUpstream::failing();
    let (coordinator, _clock) =
        build(config_with_spacing(Duration::from_millis(10)), upstream.clone());

    let mut handles = Vec::new();
    for _ in 0..3 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.invoke("search", json!({"q": "rust"})).await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, CoordinatorError::Upstream { .. }));
    }

    // One shared execution produced the shared error; nothing was cached,
    // so a later invoke dispatches again
    assert_eq!(upstream.call_count(), 1);
    let err = coordinator
        .invoke("search", json!({"q": "rust"}))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Upstream { .. }));
    assert_eq!(upstream.call_count(), 2);
}

#[tokio::test]
async fn test_cache_idempotence_sequential_invokes() {
    let upstream = MockUpstream::new();
    let (coordinator, _clock) = build(config_with_spacing(Duration::ZERO), upstream.clone());

    let first = coordinator
        .invoke("reddit-sentiment", json!({"topic": "rust"}))
        .await
        .unwrap();
    let second = coordinator
        .invoke("reddit-sentiment", json!({"topic": "rust"}))
        .await
        .unwrap();

    assert_eq!(upstream.call_count(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_key_order_in_payload_does_not_defeat_the_cache() {
    let upstream = MockUpstream::new();
    let (coordinator, _clock) = build(config_with_spacing(Duration::ZERO), upstream.clone());

    coordinator
        .invoke("search", json!({"q": "rust", "lang": "en"}))
        .await
        .unwrap();
    coordinator
        .invoke("search", json!({"lang": "en", "q": "rust"}))
        .await
        .unwrap();

    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn test_ttl_expiry_at_the_twelve_hour_policy_boundary() {
    let upstream = MockUpstream::new();
    let mut config = config_with_spacing(Duration::ZERO);
    config
        .ttl_overrides
        .insert("reddit-sentiment".to_string(), "12h".to_string());
    let (coordinator, clock) = build(config, upstream.clone());

    coordinator
        .invoke("reddit-sentiment", json!({"topic": "rust"}))
        .await
        .unwrap();
    assert_eq!(upstream.call_count(), 1);

    // 11h59m later the cached entry is still fresh
    clock.advance(Duration::from_secs(11 * 3600 + 59 * 60));
    coordinator
        .invoke("reddit-sentiment", json!({"topic": "rust"}))
        .await
        .unwrap();
    assert_eq!(upstream.call_count(), 1);

    // 12h01m after creation the entry is treated as absent
    clock.advance(Duration::from_secs(2 * 60));
    coordinator
        .invoke("reddit-sentiment", json!({"topic": "rust"}))
        .await
        .unwrap();
    assert_eq!(upstream.call_count(), 2);
}

#[tokio::test]
async fn test_results_survive_a_restart_through_the_persistent_tier() {
    let upstream = MockUpstream::new();
    let clock = Arc::new(ManualClock::default());
    let dir = tempfile::tempdir().unwrap();

    let config = config_with_spacing(Duration::ZERO);

    {
        let backend = Arc::new(FsBackend::open(dir.path(), 1024 * 1024).await.unwrap());
        let coordinator = RequestCoordinator::with_clock(
            config.clone(),
            upstream.clone(),
            Some(backend),
            clock.clone(),
        )
        .unwrap();
        coordinator
            .invoke("market-trends", json!({"idea": "X"}))
            .await
            .unwrap();
    }
    assert_eq!(upstream.call_count(), 1);

    // A fresh process with the same storage directory serves from the
    // persistent tier without touching the upstream
    let backend = Arc::new(FsBackend::open(dir.path(), 1024 * 1024).await.unwrap());
    let coordinator =
        RequestCoordinator::with_clock(config, upstream.clone(), Some(backend), clock.clone())
            .unwrap();
    let result = coordinator
        .invoke("market-trends", json!({"idea": "X"}))
        .await
        .unwrap();

    assert_eq!(upstream.call_count(), 1);
    assert_eq!(result["echo"], json!({"idea": "X"}));
}

#[tokio::test]
async fn test_eviction_under_persistent_tier_pressure() {
    let upstream = MockUpstream::new();
    let clock = Arc::new(ManualClock::default());
    // Quota sized for a handful of entries
    let backend = Arc::new(MemoryBackend::new(2_000));
    let coordinator = Arc::new(
        RequestCoordinator::with_clock(
            config_with_spacing(Duration::ZERO),
            upstream.clone(),
            Some(backend),
            clock.clone(),
        )
        .unwrap(),
    );

    // Distinct payloads fill the persistent tier past its quota
    let mut last_evictions = 0;
    for i in 0..30 {
        coordinator
            .invoke("search", json!({"q": format!("query-{:02}", i)}))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(10));

        let stats = coordinator.stats().await;
        if let Some(persistent) = &stats.cache.persistent {
            last_evictions = persistent.evictions;
        }
    }

    // Quota pressure triggered oldest-first eviction, and the cache kept
    // absorbing writes afterwards: the newest entry is served without a
    // fresh upstream call
    assert!(last_evictions > 0, "persistent quota was never reached");
    let calls_before = upstream.call_count();
    coordinator
        .invoke("search", json!({"q": "query-29"}))
        .await
        .unwrap();
    assert_eq!(upstream.call_count(), calls_before);
}

#[tokio::test]
async fn test_stats_reflect_traffic() {
    let upstream = MockUpstream::new();
    let (coordinator, _clock) = build(config_with_spacing(Duration::ZERO), upstream.clone());

    coordinator.invoke("search", json!({"q": "a"})).await.unwrap();
    coordinator.invoke("search", json!({"q": "a"})).await.unwrap();
    coordinator.invoke("search", json!({"q": "b"})).await.unwrap();

    let stats = coordinator.stats().await;
    assert_eq!(stats.scheduler.submitted, 2);
    assert_eq!(stats.scheduler.dispatched, 2);
    assert_eq!(stats.cache.hits, 1);
    assert_eq!(stats.cache.misses, 2);
    assert_eq!(stats.in_flight, 0);
}
