//! Canonical JSON and SHA-256 digests for verdicts and reports.
//!
//! Two structurally equal values always canonicalize to the same bytes:
//! object keys are sorted, arrays keep their order, and integer-valued
//! floats are written as integers.

use sha2::{Digest, Sha256};
use serde::Serialize;

use crate::domain::error::{AuditError, Result};

fn canonicalize(value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v)?);
                }
            }
            Ok(serde_json::Value::Object(sorted))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items.iter().map(canonicalize).collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) if !(n.is_i64() || n.is_u64()) => {
            let f = n.as_f64().ok_or_else(|| AuditError::RuleApplication {
                rule: "digest".to_string(),
                detail: format!("unrepresentable number {n}"),
            })?;
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
            } else {
                Ok(value.clone())
            }
        }
        other => Ok(other.clone()),
    }
}

/// Compact canonical JSON text of any serializable value.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let raw = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonicalize(&raw)?)?)
}

/// Hex SHA-256 of the canonical JSON text.
pub fn compute_digest<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
