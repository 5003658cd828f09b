// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("value cannot be canonically encoded")]
pub struct CanonicalizeError;

/// Pinned stable encoding shared with every signer implementation:
/// recursively sorted object keys, `serde_json` compact output (no
/// insignificant whitespace). Published as part of the wire contract.
pub fn canonical_json(v: &impl Serialize) -> Result<Vec<u8>, CanonicalizeError> {
    let value = serde_json::to_value(v).map_err(|_| CanonicalizeError)?;
    let sorted = sort_json(value);
    serde_json::to_vec(&sorted).map_err(|_| CanonicalizeError)
}

/// SHA-256 of the canonical encoding, lowercase hex.
pub fn canonical_hash_hex(v: &impl Serialize) -> Result<String, CanonicalizeError> {
    Ok(hex::encode(Sha256::digest(canonical_json(v)?)))
}

fn sort_json(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, val) in entries {
                sorted.insert(k, sort_json(val));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}
