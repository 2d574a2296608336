//! # Configuration Module
//!
//! This module handles configuration for the coordinator. It provides the
//! core configuration structures, YAML/JSON loading, environment variable
//! overrides, and validation with detailed error messages.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human-readable durations ("1s", "12h") via humantime
//! - Environment variable override support (`COORDINATOR_*`)
//! - Validation with detailed error messages
//!
//! All values are supplied at process start and are immutable afterwards,
//! except via explicit setters on the built components intended for tests
//! and ops tooling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::caching::TtlPolicy;
use crate::core::error::{CoordinatorError, CoordinatorResult};

/// Main coordinator configuration structure
///
/// Deserializable from YAML or JSON. Duration fields accept humantime
/// strings such as `"1s"` or `"6h"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Minimum delay between the start of any two consecutive upstream
    /// dispatches
    #[serde(with = "humantime_serde", default = "defaults::min_spacing")]
    pub min_spacing: Duration,

    /// TTL applied when an endpoint has no explicit policy entry
    #[serde(with = "humantime_serde", default = "defaults::default_ttl")]
    pub default_ttl: Duration,

    /// Maximum number of upstream calls in flight through the scheduler.
    /// Must be >= 1; the default of 1 serializes all dispatches.
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Per-endpoint TTL overrides as humantime strings, keyed by logical
    /// endpoint name (e.g. `reddit-sentiment: "12h"`)
    #[serde(default)]
    pub ttl_overrides: HashMap<String, String>,

    /// In-memory (structured) cache tier configuration
    #[serde(default)]
    pub memory: MemoryTierConfig,

    /// Persistent cache tier configuration
    #[serde(default)]
    pub persistent: PersistentTierConfig,
}

/// Configuration for the in-memory structured cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTierConfig {
    /// Maximum number of entries before oldest-first eviction kicks in
    pub max_entries: usize,

    /// Interval of the background task that purges expired entries
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for the persistent cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentTierConfig {
    /// Enable the persistent tier. When disabled, only the in-memory tier
    /// is consulted and results do not survive the process.
    pub enabled: bool,

    /// Key prefix applied to every entry written to the storage backend
    pub key_prefix: String,
}

impl Default for PersistentTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "coordinator:cache:".to_string(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_spacing: defaults::min_spacing(),
            default_ttl: defaults::default_ttl(),
            max_concurrent: defaults::max_concurrent(),
            ttl_overrides: HashMap::new(),
            memory: MemoryTierConfig::default(),
            persistent: PersistentTierConfig::default(),
        }
    }
}

mod defaults {
    use std::time::Duration;

    pub fn min_spacing() -> Duration {
        Duration::from_secs(1)
    }

    pub fn default_ttl() -> Duration {
        Duration::from_secs(6 * 3600)
    }

    pub fn max_concurrent() -> usize {
        1
    }
}

impl CoordinatorConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> CoordinatorResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoordinatorError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: CoordinatorConfig = serde_yaml::from_str(&content)
            .map_err(|e| CoordinatorError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> CoordinatorResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoordinatorError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: CoordinatorConfig = serde_json::from_str(&content)
            .map_err(|e| CoordinatorError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: COORDINATOR_<FIELD>
    /// For example: COORDINATOR_MIN_SPACING=250ms
    pub fn apply_env_overrides(&mut self) -> CoordinatorResult<()> {
        use std::env;

        if let Ok(spacing) = env::var("COORDINATOR_MIN_SPACING") {
            self.min_spacing = humantime::parse_duration(&spacing).map_err(|e| {
                CoordinatorError::config(format!("Invalid COORDINATOR_MIN_SPACING: {}", e))
            })?;
        }

        if let Ok(ttl) = env::var("COORDINATOR_DEFAULT_TTL") {
            self.default_ttl = humantime::parse_duration(&ttl).map_err(|e| {
                CoordinatorError::config(format!("Invalid COORDINATOR_DEFAULT_TTL: {}", e))
            })?;
        }

        if let Ok(concurrent) = env::var("COORDINATOR_MAX_CONCURRENT") {
            self.max_concurrent = concurrent.parse().map_err(|e| {
                CoordinatorError::config(format!("Invalid COORDINATOR_MAX_CONCURRENT: {}", e))
            })?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.max_concurrent == 0 {
            return Err(CoordinatorError::config("max_concurrent must be >= 1"));
        }

        if self.memory.max_entries == 0 {
            return Err(CoordinatorError::config("memory.max_entries must be >= 1"));
        }

        if self.memory.cleanup_interval.is_zero() {
            return Err(CoordinatorError::config(
                "memory.cleanup_interval must be positive",
            ));
        }

        // Parse all TTL overrides up front so a typo fails at startup rather
        // than at the first lookup
        for (endpoint, value) in &self.ttl_overrides {
            humantime::parse_duration(value).map_err(|e| {
                CoordinatorError::config(format!(
                    "Invalid TTL override for endpoint '{}': {}",
                    endpoint, e
                ))
            })?;
        }

        Ok(())
    }

    /// Build the typed TTL policy table from this configuration
    pub fn ttl_policy(&self) -> CoordinatorResult<TtlPolicy> {
        let mut overrides = HashMap::with_capacity(self.ttl_overrides.len());
        for (endpoint, value) in &self.ttl_overrides {
            let ttl = humantime::parse_duration(value).map_err(|e| {
                CoordinatorError::config(format!(
                    "Invalid TTL override for endpoint '{}': {}",
                    endpoint, e
                ))
            })?;
            overrides.insert(endpoint.clone(), ttl);
        }

        Ok(TtlPolicy::new(self.default_ttl).with_overrides(overrides))
    }
}
