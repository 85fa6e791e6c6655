//! Canonical JSON and stable SHA-256 digests for envelope hashing.
//!
//! Canonical form: object keys sorted bytewise, integer-valued floats
//! collapsed to integers, non-finite numbers rejected, compact output.
//! Identical logical content therefore hashes identically across
//! processes regardless of insertion order.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::error::{EngineError, Result};

/// Produce the canonical compact JSON string for `value`.
pub fn canonicalize(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_value(value)?;
    Ok(serde_json::to_string(&canonical)?)
}

/// SHA-256 hex digest over the canonical JSON form of `value`.
pub fn stable_digest(value: &serde_json::Value) -> Result<String> {
    let canonical = canonicalize(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn canonical_value(value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            // BTreeMap gives bytewise key ordering for free.
            let mut sorted = BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonical_value(v)?);
            }
            Ok(serde_json::Value::Object(sorted.into_iter().collect()))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(canonical_value)
                .collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) => canonical_number(n),
        other => Ok(other.clone()),
    }
}

fn canonical_number(n: &serde_json::Number) -> Result<serde_json::Value> {
    if n.is_i64() || n.is_u64() {
        return Ok(serde_json::Value::Number(n.clone()));
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Ok(serde_json::Value::Number(serde_json::Number::from(
                    f as i64,
                )))
            } else {
                Ok(serde_json::Value::Number(n.clone()))
            }
        }
        _ => Err(EngineError::InvalidInput(
            "non-finite number in canonical JSON".to_string(),
        )),
    }
}
