//! Canonical serialization and SHA-256 digests
//!
//! Identity of a derived billing record is the digest of its canonical form:
//! the record serialized to a JSON object, with non-identity fields removed
//! and keys sorted, rendered without whitespace.

use crate::error::{CommonError, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Render `value` as sorted-key compact JSON, dropping the `excluded` top-level fields.
///
/// The value must serialize to a JSON object.
pub fn canonical_json<T: Serialize>(value: &T, excluded: &[&str]) -> Result<String> {
    let object = match serde_json::to_value(value)? {
        Value::Object(map) => map,
        other => return Err(CommonError::NotAnObject(type_name(&other).to_string())),
    };

    let sorted: BTreeMap<String, Value> = object
        .into_iter()
        .filter(|(key, _)| !excluded.contains(&key.as_str()))
        .collect();

    Ok(serde_json::to_string(&sorted)?)
}

/// Lowercase hex SHA-256 of `input` (64 characters).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
