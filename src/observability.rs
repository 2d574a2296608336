//! # Observability Module
//!
//! Tracing subscriber initialization for binaries and test harnesses that
//! embed the coordinator. The library itself only emits `tracing` events;
//! installing a subscriber is the host's decision.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::error::{CoordinatorError, CoordinatorResult};

/// Install a formatted tracing subscriber with env-filter support.
///
/// The filter defaults to `info` and is overridable through `RUST_LOG`
/// (e.g. `RUST_LOG=upstream_coordinator=debug`). Fails if a global
/// subscriber is already installed.
pub fn init_observability() -> CoordinatorResult<()> {
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        );

    subscriber.try_init().map_err(|e| {
        CoordinatorError::internal(format!("Failed to install tracing subscriber: {}", e))
    })?;

    info!("Observability initialized");
    Ok(())
}
