//! Canonical JSON and content addressing for report evidence.
//!
//! Canonical form: object keys sorted by byte order at every depth, arrays
//! left in order, no insignificant whitespace, UTF-8. Numbers are printed by
//! `serde_json`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::evaluate::Finding;
use crate::model::{Monitor, Observation};

/// Schema tag embedded in every evidence payload.
pub const EVIDENCE_SCHEMA: &str = "prmx.evidence.v1";

/// Recursively sorts object keys.
pub fn canonicalize_json_value(value: &Value) -> Value {
    match value {
        Value::Array(values) => Value::Array(values.iter().map(canonicalize_json_value).collect()),
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut out = Map::with_capacity(map.len());
            for (k, v) in entries {
                out.insert(k.clone(), canonicalize_json_value(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Compact canonical serialization of `value`.
pub fn canonical_json_string(value: &Value) -> String {
    // Serializing a `Value` cannot fail: keys are strings and numbers are finite.
    serde_json::to_string(&canonicalize_json_value(value)).unwrap_or_else(|_| "null".to_string())
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Raw 32-byte SHA-256 evidence digest, as the ledger call expects it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvidenceHash([u8; 32]);

/// Why a string is not an evidence hash.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvidenceHashError {
    /// Wrong number of hex characters after the optional `0x`.
    #[error("evidence hash must be 64 hex characters, got {0}")]
    Length(usize),
    /// Right length, but not hex.
    #[error("evidence hash is not valid hex: {0}")]
    Hex(String),
}

impl EvidenceHash {
    /// Wraps a raw digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses 64 hex characters, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, EvidenceHashError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 64 {
            return Err(EvidenceHashError::Length(s.len()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|e| EvidenceHashError::Hex(e.to_string()))?;
        Ok(Self(out))
    }
}

impl fmt::Display for EvidenceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EvidenceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvidenceHash({})", self.to_hex())
    }
}

impl FromStr for EvidenceHash {
    type Err = EvidenceHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for EvidenceHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", self.to_hex()))
    }
}

impl<'de> Deserialize<'de> for EvidenceHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Canonical serialization plus its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvidence {
    /// Compact, key-sorted JSON that was hashed.
    pub canonical_json: String,
    /// SHA-256 of `canonical_json`.
    pub hash: EvidenceHash,
}

/// Canonicalizes `payload` and hashes it.
pub fn hash_evidence(payload: &Value) -> CanonicalEvidence {
    let canonical_json = canonical_json_string(payload);
    let digest: [u8; 32] = Sha256::digest(canonical_json.as_bytes()).into();
    CanonicalEvidence {
        canonical_json,
        hash: EvidenceHash(digest),
    }
}

/// Evidence payload supporting `finding` for `monitor`.
///
/// Only the observations that contributed to the decision are included,
/// and no evaluation-time clock, so unchanged data hashes identically.
pub fn build_evidence(monitor: &Monitor, observations: &[Observation], finding: &Finding) -> Value {
    let readings: Vec<Value> = observations
        .iter()
        .filter(|o| {
            o.observed_at_ms >= monitor.window_start_ms
                && o.observed_at_ms < monitor.window_end_ms
                && o.observed_at_ms <= finding.observed_at_ms
        })
        .map(|o| {
            json!({
                "observed_at_ms": o.observed_at_ms,
                "rainfall_mm": o.rainfall_mm,
                "source": o.source,
            })
        })
        .collect();

    json!({
        "schema": EVIDENCE_SCHEMA,
        "policy_id": monitor.policy_id,
        "location_id": monitor.location_id,
        "threshold_mm": monitor.threshold_mm,
        "window": {
            "start_ms": monitor.window_start_ms,
            "end_ms": monitor.window_end_ms,
        },
        "outcome": finding.outcome,
        "observed_at_ms": finding.observed_at_ms,
        "cumulative_mm": finding.cumulative_mm,
        "observations": readings,
    })
}
