//! Payload fingerprinting.
//!
//! Two requests under the same idempotency key are "the same" request iff
//! their canonical serializations hash to the same digest. Canonical form
//! sorts object keys lexicographically at every depth, so key order never
//! produces a false conflict; array order stays significant.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Rebuild `value` with object keys in sorted order at every depth.
///
/// Sorting is explicit rather than relying on `serde_json`'s map type, so
/// the digest is stable even if `preserve_order` ends up in the feature set.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key.clone(), canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical serialization of a payload; this is also the form persisted
/// in the ledger record.
pub fn canonical_json(payload: &Value) -> String {
    canonicalize(payload).to_string()
}

/// Hex-encoded SHA-256 of a canonical serialization.
pub fn digest(canonical: &str) -> String {
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Fingerprint a payload directly.
pub fn fingerprint(payload: &Value) -> String {
    digest(&canonical_json(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn digest_is_hex_sha256() {
        let fp = fingerprint(&json!({"a": 1}));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn top_level_key_order_is_insignificant() {
        let a: Value = serde_json::from_str(r#"{"amount":100,"currency":"USD"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"currency":"USD","amount":100}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn nested_key_order_is_insignificant() {
        let a: Value = serde_json::from_str(r#"{"outer":{"x":1,"y":2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"outer":{"y":2,"x":1}}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn value_change_changes_digest() {
        assert_ne!(
            fingerprint(&json!({"amount": 100})),
            fingerprint(&json!({"amount": 200}))
        );
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(
            fingerprint(&json!({"items": [1, 2]})),
            fingerprint(&json!({"items": [2, 1]}))
        );
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let payload: Value = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":3}}"#).unwrap();
        assert_eq!(canonical_json(&payload), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
