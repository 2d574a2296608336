//! # Upstream Coordinator Library
//!
//! A serialized request scheduler combined with a layered response cache
//! for applications that call slow, rate-limited, pay-per-call external
//! services. Every outbound call is funneled through one coordination
//! layer that:
//!
//! - enforces a minimum delay between the start of any two upstream calls,
//! - deduplicates concurrent identical calls into one in-flight execution,
//! - caches results in an in-memory tier plus a bounded persistent tier,
//!   with per-endpoint TTL policies.
//!
//! The library defines no wire protocol: it is consumed in-process. The
//! real upstream call and the persistent storage backend are collaborators
//! injected at construction.
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use upstream_coordinator::{
//!     CoordinatorConfig, FsBackend, RequestCoordinator, UpstreamCall,
//! };
//!
//! # async fn example(upstream: Arc<dyn UpstreamCall>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoordinatorConfig::load_from_file("coordinator.yaml").await?;
//! let backend = Arc::new(FsBackend::open("/var/cache/coordinator", 64 * 1024 * 1024).await?);
//! let coordinator = RequestCoordinator::new(config, upstream, Some(backend))?;
//!
//! let trends = coordinator
//!     .invoke("market-trends", serde_json::json!({"idea": "X"}))
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// Core functionality: error taxonomy, configuration, and the clock
/// abstraction cache expiry is computed against
pub mod core;

/// The paced FIFO scheduler that serializes upstream dispatches
pub mod scheduler;

/// The layered response cache: in-memory structured tier, bounded
/// persistent tier, and per-endpoint TTL policies
pub mod caching;

/// The public façade: fingerprinting, in-flight deduplication, and the
/// `invoke` entry point
pub mod coordinator;

/// Tracing subscriber initialization for binaries and tests embedding the
/// coordinator
pub mod observability;

// Re-export the public API surface so users don't need to know the module
// layout

pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::{CoordinatorConfig, MemoryTierConfig, PersistentTierConfig};
pub use crate::core::error::{CoordinatorError, CoordinatorResult};

pub use crate::caching::{
    CacheEntry, CacheError, CacheStats, FsBackend, MemoryBackend, StorageBackend, StorageError,
    TieredCache, TtlPolicy,
};

pub use crate::coordinator::{
    CoordinatorStats, Fingerprint, InFlightTable, RequestCoordinator, UpstreamCall,
};

pub use crate::scheduler::{RequestScheduler, SchedulerConfig, SchedulerStats};
