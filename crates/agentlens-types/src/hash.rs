//! Canonical JSON serialization and the chained SHA-256 event hasher.
//!
//! The hash contract (spec I1) must be byte-identical across languages so
//! SDKs can pre-compute and verify chains without talking to the server.
//! We never hand a `serde_json::Value` straight to `to_string` for hashing
//! purposes: `Value::Object` is backed by a map whose iteration order is
//! not guaranteed to be insertion order once mutated, so canonicalization
//! always routes through a `BTreeMap` first.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A hex-encoded SHA-256 digest.
pub type HexHash = String;

/// Serialize `value` to canonical JSON: object keys sorted lexicographically
/// at every depth, UTF-8 without BOM, numbers in their natural round-trip
/// form (delegated to `serde_json`, which already avoids trailing zeros).
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hash arbitrary canonical-JSON-serializable fields into a hex SHA-256 digest.
pub fn hash_canonical<T: Serialize>(fields: &T) -> HexHash {
    let value = serde_json::to_value(fields).expect("event fields are always serializable");
    let canonical = canonical_json(&value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash raw bytes (used for content-hashing embedding text, webhook bodies).
pub fn sha256_hex(data: &[u8]) -> HexHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two hex digests (P8: signature verification
/// must not leak timing information about where the mismatch occurred).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_at_every_depth() {
        let value = json!({"b": 1, "a": {"z": 1, "y": 2}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn hash_canonical_is_deterministic() {
        #[derive(Serialize)]
        struct F {
            b: u32,
            a: u32,
        }
        let h1 = hash_canonical(&F { a: 1, b: 2 });
        let h2 = hash_canonical(&F { a: 1, b: 2 });
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn constant_time_eq_detects_any_byte_flip() {
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
        assert!(!constant_time_eq("abcd", "abc"));
    }
}
