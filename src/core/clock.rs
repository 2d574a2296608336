//! # Clock Abstraction
//!
//! Cache expiry is computed against a millisecond wall clock supplied through
//! the `Clock` trait so that long-horizon TTL behavior (hours or days) can be
//! tested without real sleeps. The scheduler's spacing delays use
//! `tokio::time` directly and are not routed through this trait.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Monotonically non-decreasing wall clock in milliseconds since the Unix
/// epoch
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds
    fn now_millis(&self) -> u64;
}

/// System wall clock, the default for production use
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock for tests
///
/// Starts at an arbitrary positive instant and only moves when `advance` or
/// `set_millis` is called, which makes TTL boundaries exact.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock starting at the given millisecond timestamp
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Advance the clock by a duration
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the clock to an absolute millisecond timestamp
    pub fn set_millis(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        // Nonzero so that saturating age arithmetic stays meaningful
        Self::new(1_000_000)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
