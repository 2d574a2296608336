//! # Request Fingerprinting
//!
//! Derives the deterministic key that joins the cache store and the
//! in-flight deduplication table. Two logically identical requests (same
//! endpoint, same payload after canonicalization) always produce the same
//! fingerprint, regardless of the key order of any JSON objects in the
//! payload.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::core::error::{CoordinatorError, CoordinatorResult};

/// Deterministic identifier for a logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for an endpoint and payload.
    ///
    /// The payload is serialized with object keys sorted recursively, then
    /// hashed; the endpoint name stays in the clear so cache keys remain
    /// greppable per endpoint.
    pub fn compute(endpoint: &str, payload: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(payload, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical.as_bytes());
        let hash = hasher.finalize();

        Self(format!("{}:{}", endpoint, hex::encode(hash)))
    }

    /// Canonicalize an arbitrary serializable payload and compute its
    /// fingerprint. Fails fast with a `Canonicalization` error for payloads
    /// that cannot be represented as JSON (non-string map keys, non-finite
    /// floats, failing `Serialize` impls).
    pub fn try_compute<T: serde::Serialize>(
        endpoint: &str,
        payload: &T,
    ) -> CoordinatorResult<(Self, Value)> {
        let value = serde_json::to_value(payload)
            .map_err(|e| CoordinatorError::canonicalization(e.to_string()))?;
        Ok((Self::compute(endpoint, &value), value))
    }

    /// The fingerprint as a cache key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write a JSON value in canonical form: object keys sorted recursively,
/// compact separators
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Scalar serialization of a string never fails
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
