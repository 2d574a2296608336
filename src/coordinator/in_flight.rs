//! # In-Flight Deduplication Table
//!
//! A transient map from fingerprint to the shared future of an upstream
//! call that has been admitted to the scheduler but has not yet settled.
//! Every concurrent caller for the same fingerprint attaches to the same
//! future instead of re-enqueueing, which is what prevents cache stampedes.
//!
//! Entries are removed the instant the call settles, success or failure.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;

use crate::core::error::CoordinatorResult;

/// The shared settled-or-pending outcome of one upstream execution
pub type SharedOutcome = Shared<BoxFuture<'static, CoordinatorResult<Value>>>;

/// Fingerprint -> shared in-flight future
#[derive(Default)]
pub struct InFlightTable {
    entries: DashMap<String, SharedOutcome>,
}

impl InFlightTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the in-flight future for a fingerprint, creating it with
    /// `create` if absent. Returns the shared future and whether this caller
    /// became the leader (i.e. the one whose call was enqueued).
    ///
    /// The check-and-insert is atomic per key, so two racing callers can
    /// never both become leader. `create` must not block or re-enter this
    /// table: it runs while the map shard is locked.
    pub fn join_or_insert<F>(&self, fingerprint: &str, create: F) -> (SharedOutcome, bool)
    where
        F: FnOnce() -> SharedOutcome,
    {
        match self.entries.entry(fingerprint.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let outcome = create();
                entry.insert(outcome.clone());
                (outcome, true)
            }
        }
    }

    /// Drop the entry for a settled fingerprint, returning whether it was
    /// present
    pub fn remove(&self, fingerprint: &str) -> bool {
        self.entries.remove(fingerprint).is_some()
    }

    /// Number of calls currently in flight
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no calls are in flight
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
