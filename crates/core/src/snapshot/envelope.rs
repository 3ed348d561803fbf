//! Envelope and stored-record formats.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Versioned, timestamped wrapper around persisted data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub version: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub data: T,
}

impl Envelope<Value> {
    /// Decode the untyped payload. `None` when the data has the wrong shape.
    pub fn decode<T: DeserializeOwned>(self) -> Option<Envelope<T>> {
        let data = serde_json::from_value(self.data).ok()?;
        Some(Envelope { version: self.version, timestamp: self.timestamp, etag: self.etag, data })
    }
}

/// Value stored under a primary snapshot key.
///
/// Chunk keys hold raw slices of the serialized envelope and are never tagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub(crate) enum StoredRecord {
    Inline {
        envelope: Value,
    },
    Chunked {
        #[serde(rename = "chunkCount")]
        chunk_count: usize,
    },
}

/// Why a stored snapshot was treated as absent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub(crate) enum Invalid {
    #[error("unparsable record: {0}")]
    Corrupt(String),

    #[error("chunk set has {found} of {expected} chunks")]
    ChunkMismatch { expected: usize, found: usize },

    #[error("payload of {bytes} bytes exceeds {max}")]
    Oversize { bytes: usize, max: usize },

    #[error("format version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("expired {age_ms}ms ago")]
    Expired { age_ms: i64 },

    #[error("payload shape mismatch: {0}")]
    Shape(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    version: u32,
    timestamp: i64,
    #[serde(default)]
    etag: Option<String>,
    data: Value,
}

/// Check version and age, then decode the payload into `T`.
pub(crate) fn validate<T: DeserializeOwned>(
    value: Value, expected_version: u32, max_age_ms: i64, now_ms: i64,
) -> Result<Envelope<T>, Invalid> {
    let raw: RawEnvelope = serde_json::from_value(value).map_err(|e| Invalid::Corrupt(e.to_string()))?;

    if raw.version != expected_version {
        return Err(Invalid::VersionMismatch { found: raw.version, expected: expected_version });
    }

    let age_ms = now_ms - raw.timestamp;
    if age_ms > max_age_ms {
        return Err(Invalid::Expired { age_ms: age_ms - max_age_ms });
    }

    let data = serde_json::from_value(raw.data).map_err(|e| Invalid::Shape(e.to_string()))?;
    Ok(Envelope { version: raw.version, timestamp: raw.timestamp, etag: raw.etag, data })
}
