//! Request fingerprints for deduplication.
//!
//! A fingerprint is the SHA-256 of the canonical JSON form of a payload with
//! volatile fields removed. serde_json maps are ordered by key, so the
//! serialized form does not depend on the order fields arrived in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::WorkPayload;

/// Fields that vary between otherwise identical requests.
pub const VOLATILE_FIELDS: &[&str] = &[
    "client_request_id",
    "request_id",
    "timestamp",
    "submitted_at",
    "nonce",
    "trace_id",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Fingerprint a work payload.
    pub fn of(payload: &WorkPayload) -> Result<Self> {
        let value = serde_json::to_value(payload)?;
        Ok(Self::of_value(&value))
    }

    /// Fingerprint an arbitrary JSON value.
    pub fn of_value(value: &Value) -> Self {
        let stripped = strip_volatile(value);
        let mut hasher = Sha256::new();
        hasher.update(stripped.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_volatile(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !VOLATILE_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_volatile(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_volatile).collect()),
        other => other.clone(),
    }
}
