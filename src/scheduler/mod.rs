//! # Request Scheduler
//!
//! A FIFO queue that admits asynchronous units of work and executes them
//! with a minimum delay between the start of any two consecutive dispatches.
//! At most `max_concurrent` calls (default 1) are in flight through the
//! scheduler at a time.
//!
//! `submit` never blocks: it appends to the queue and returns a pending
//! receiver. A single drain task per scheduler pops items in submission
//! order, sleeps out the remaining spacing, runs the work, and settles the
//! submitter's receiver with the outcome. A failed call still consumes a
//! time slot, which prevents retry storms. The scheduler itself never
//! retries; retry policy belongs to the caller.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::error::{CoordinatorError, CoordinatorResult};

/// Boxed unit of work admitted to the queue
type ScheduledWork = Box<dyn FnOnce() -> BoxFuture<'static, CoordinatorResult<Value>> + Send>;

/// One admitted unit of work, owned by the queue until dequeued
struct QueueItem {
    work: ScheduledWork,
    settle: oneshot::Sender<CoordinatorResult<Value>>,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum delay between the start of two consecutive dispatches
    #[serde(with = "humantime_serde")]
    pub min_spacing: Duration,

    /// Maximum number of calls in flight through the scheduler (>= 1)
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_secs(1),
            max_concurrent: 1,
        }
    }
}

/// Mutable scheduler state, all behind one mutex
struct SchedulerState {
    queue: VecDeque<QueueItem>,
    draining: bool,
    last_dispatch_at: Option<Instant>,
    min_spacing: Duration,
}

/// Counters shared with the drain task
#[derive(Debug, Default)]
struct SchedulerCounters {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    failures: AtomicU64,
    queue_depth: AtomicUsize,
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Total units of work submitted
    pub submitted: u64,

    /// Total units of work dispatched
    pub dispatched: u64,

    /// Dispatches whose work returned an error
    pub failures: u64,

    /// Items currently waiting in the queue
    pub queue_depth: usize,
}

/// Paced FIFO request scheduler
pub struct RequestScheduler {
    state: Arc<Mutex<SchedulerState>>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    counters: Arc<SchedulerCounters>,
}

impl RequestScheduler {
    /// Create a scheduler with the given spacing and concurrency bound
    pub fn new(config: SchedulerConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);

        Self {
            state: Arc::new(Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                draining: false,
                last_dispatch_at: None,
                min_spacing: config.min_spacing,
            })),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            counters: Arc::new(SchedulerCounters::default()),
        }
    }

    /// Append a unit of work to the queue tail and return its pending
    /// outcome. Never blocks; starts the drain task if idle.
    ///
    /// The returned receiver yields `Err(RecvError)` only if the runtime is
    /// torn down before the item settles; the queue itself always runs every
    /// admitted item to completion.
    pub fn submit<F, Fut>(&self, work: F) -> oneshot::Receiver<CoordinatorResult<Value>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = CoordinatorResult<Value>> + Send + 'static,
    {
        let (settle, receiver) = oneshot::channel();
        let item = QueueItem {
            work: Box::new(move || work().boxed()),
            settle,
        };

        let start_drain = {
            let mut state = self.state.lock();
            state.queue.push_back(item);
            self.counters
                .queue_depth
                .store(state.queue.len(), Ordering::Relaxed);
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if start_drain {
            let state = self.state.clone();
            let permits = self.permits.clone();
            let counters = self.counters.clone();
            let max_concurrent = self.max_concurrent;

            tokio::spawn(async move {
                Self::drain(state, permits, counters, max_concurrent).await;
            });
        }

        receiver
    }

    /// Change the spacing for subsequent dispatches. Not retroactive: an
    /// in-progress wait keeps the spacing it was computed with.
    pub fn set_min_spacing(&self, min_spacing: Duration) {
        self.state.lock().min_spacing = min_spacing;
        debug!("Scheduler spacing set to {:?}", min_spacing);
    }

    /// The currently configured spacing
    pub fn min_spacing(&self) -> Duration {
        self.state.lock().min_spacing
    }

    /// Items currently waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Snapshot of the scheduler counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            queue_depth: self.counters.queue_depth.load(Ordering::Relaxed),
        }
    }

    /// The drain loop: dispatch queued items one at a time with enforced
    /// spacing until the queue is empty, then clear the draining flag.
    async fn drain(
        state: Arc<Mutex<SchedulerState>>,
        permits: Arc<Semaphore>,
        counters: Arc<SchedulerCounters>,
        max_concurrent: usize,
    ) {
        loop {
            // Emptiness and the draining flag are decided under the same
            // lock, so a submit racing with the final pop either lands
            // before it or observes draining == false and spawns a fresh
            // drain task
            let item = {
                let mut state = state.lock();
                match state.queue.pop_front() {
                    Some(item) => {
                        counters
                            .queue_depth
                            .store(state.queue.len(), Ordering::Relaxed);
                        item
                    }
                    None => {
                        state.draining = false;
                        counters.queue_depth.store(0, Ordering::Relaxed);
                        return;
                    }
                }
            };

            let wait = {
                let state = state.lock();
                match state.last_dispatch_at {
                    Some(last) => state.min_spacing.saturating_sub(last.elapsed()),
                    None => Duration::ZERO,
                }
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            counters.dispatched.fetch_add(1, Ordering::Relaxed);

            if max_concurrent <= 1 {
                // Serial mode: the next item's spacing is measured from this
                // item's completion, so a slow call widens the gap
                let outcome = (item.work)().await;
                if outcome.is_err() {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                }
                state.lock().last_dispatch_at = Some(Instant::now());
                let _ = item.settle.send(outcome);
            } else {
                // Concurrent mode: a permit bounds in-flight work and the
                // spacing is measured between dispatch starts
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Scheduler semaphore closed; dropping queued item");
                        let _ = item
                            .settle
                            .send(Err(CoordinatorError::internal("scheduler shut down")));
                        continue;
                    }
                };
                state.lock().last_dispatch_at = Some(Instant::now());

                let counters = counters.clone();
                tokio::spawn(async move {
                    let outcome = (item.work)().await;
                    if outcome.is_err() {
                        counters.failures.fetch_add(1, Ordering::Relaxed);
                    }
                    let _ = item.settle.send(outcome);
                    drop(permit);
                });
            }
        }
    }
}
