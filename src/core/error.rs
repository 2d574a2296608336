//! # Error Handling Module
//!
//! This module defines the error taxonomy for the coordinator using the
//! `thiserror` crate. Every failure surfaced to a caller of the façade is a
//! typed `CoordinatorError`; the scheduler and cache layers never let one
//! failing request corrupt state for unrelated fingerprints.
//!
//! Errors are `Clone` because a settled outcome fans out to every awaiter of
//! a shared in-flight future.

use thiserror::Error;

use crate::caching::CacheError;

/// Main result type used throughout the coordinator
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Error types for the request coordinator
///
/// Each variant represents a different category of failure. The
/// `#[error("...")]` attribute from `thiserror` implements `Display` with the
/// specified message.
#[derive(Debug, Error, Clone)]
pub enum CoordinatorError {
    /// The payload could not be turned into a stable fingerprint.
    /// Fails fast; the request is never enqueued.
    #[error("Payload canonicalization failed: {reason}")]
    Canonicalization { reason: String },

    /// The wrapped upstream call failed. Propagated to all awaiters of the
    /// in-flight future for that fingerprint; never cached.
    #[error("Upstream call failed for endpoint '{endpoint}': {message}")]
    Upstream { endpoint: String, message: String },

    /// The persistent cache tier rejected a write even after eviction.
    /// Treated as a soft failure by the façade: the put is dropped and the
    /// caller's successful result is still returned.
    #[error("Cache capacity exhausted: {message}")]
    Capacity { message: String },

    /// Configuration-related errors (invalid values, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal errors for unexpected failures (dropped channels, poisoned
    /// state) that have no more specific category
    #[error("Internal coordinator error: {message}")]
    Internal { message: String },
}

impl CoordinatorError {
    /// Create a canonicalization error with a custom reason
    pub fn canonicalization<S: Into<String>>(reason: S) -> Self {
        Self::Canonicalization {
            reason: reason.into(),
        }
    }

    /// Create an upstream error for a named endpoint
    pub fn upstream<S: Into<String>>(endpoint: S, message: S) -> Self {
        Self::Upstream {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a capacity error
    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::Capacity {
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a soft cache-capacity failure that must not be
    /// surfaced to façade callers
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }
}

impl From<CacheError> for CoordinatorError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Capacity { message } => CoordinatorError::Capacity { message },
            other => CoordinatorError::internal(format!("Cache error: {}", other)),
        }
    }
}
