//! # TTL Policy Table
//!
//! Centralizes per-endpoint freshness assumptions (e.g. trend data is stable
//! for a day, sentiment data for twelve hours). Pure data; no behavior beyond
//! lookup with fallback to a default. Read-only after construction; tests
//! inject a custom table instead of mutating global state.

use std::collections::HashMap;
use std::time::Duration;

/// Per-endpoint TTL policy with a default fallback
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    /// TTL applied when an endpoint has no explicit entry
    default_ttl: Duration,

    /// Explicit per-endpoint durations, keyed by logical endpoint name
    overrides: HashMap<String, Duration>,
}

impl TtlPolicy {
    /// Create a policy table with only a default TTL
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            overrides: HashMap::new(),
        }
    }

    /// Replace the override table wholesale
    pub fn with_overrides(mut self, overrides: HashMap<String, Duration>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Add a single endpoint override
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S, ttl: Duration) -> Self {
        self.overrides.insert(endpoint.into(), ttl);
        self
    }

    /// Resolve the TTL for an endpoint, falling back to the default
    pub fn lookup(&self, endpoint: &str) -> Duration {
        self.overrides
            .get(endpoint)
            .copied()
            .unwrap_or(self.default_ttl)
    }

    /// The fallback TTL
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Number of explicit endpoint entries
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// Whether the table has no explicit entries
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(6 * 3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_with_fallback() {
        let policy = TtlPolicy::new(Duration::from_secs(6 * 3600))
            .with_endpoint("market-trends", Duration::from_secs(24 * 3600))
            .with_endpoint("reddit-sentiment", Duration::from_secs(12 * 3600));

        assert_eq!(
            policy.lookup("market-trends"),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            policy.lookup("reddit-sentiment"),
            Duration::from_secs(12 * 3600)
        );
        assert_eq!(policy.lookup("llm-summary"), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_zero_ttl_is_representable() {
        // A zero TTL means "never cache" and must survive the table untouched
        let policy = TtlPolicy::default().with_endpoint("volatile", Duration::ZERO);
        assert_eq!(policy.lookup("volatile"), Duration::ZERO);
    }

    #[test]
    fn test_with_overrides_replaces_table() {
        let mut overrides = HashMap::new();
        overrides.insert("a".to_string(), Duration::from_secs(1));

        let policy = TtlPolicy::new(Duration::from_secs(10))
            .with_endpoint("b", Duration::from_secs(2))
            .with_overrides(overrides);

        assert_eq!(policy.len(), 1);
        assert_eq!(policy.lookup("a"), Duration::from_secs(1));
        assert_eq!(policy.lookup("b"), Duration::from_secs(10));
    }
}
