//! Versioned envelopes for persisted cache entries.
//!
//! Persistent entries are stored in the backend as a JSON string:
//!
//! ```text
//! { "version": 1, "storedAt": 1718000000000, "value": <any JSON> }
//! ```
//!
//! `storedAt` is wall-clock milliseconds since the Unix epoch so that TTLs keep
//! counting across restarts. A record with another `version` is rejected and
//! treated as a miss.
//!
//! # Example
//!
//! ```rust
//! use catalog_cache::serialization::{decode_entry, encode_entry};
//! use serde_json::json;
//!
//! # fn main() -> catalog_cache::Result<()> {
//! let raw = encode_entry(&json!({"id": "cat-1"}), 1_000)?;
//! let entry = decode_entry(&raw)?;
//! assert_eq!(entry.stored_at, 1_000);
//! assert_eq!(entry.value["id"], "cat-1");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current schema version of persisted envelopes.
///
/// Increment when the envelope layout changes. Older records are then
/// discarded on first read instead of being migrated.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Persisted form of one cache entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    pub version: u32,
    /// Milliseconds since the Unix epoch.
    pub stored_at: u64,
    pub value: Value,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Encode a value and its store time as an envelope string.
///
/// # Errors
///
/// Returns `Error::SerializationError` if the envelope cannot be encoded.
pub fn encode_entry(value: &Value, stored_at: u64) -> Result<String> {
    let envelope = PersistedEntry {
        version: CURRENT_SCHEMA_VERSION,
        stored_at,
        value: value.clone(),
    };
    serde_json::to_string(&envelope).map_err(|e| {
        error!("Cache entry serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode an envelope string, checking its schema version.
///
/// # Errors
///
/// - `Error::DeserializationError`: not a valid envelope
/// - `Error::VersionMismatch`: envelope written by another schema version
pub fn decode_entry(raw: &str) -> Result<PersistedEntry> {
    let envelope: PersistedEntry = serde_json::from_str(raw).map_err(|e| {
        warn!("Persisted cache entry is not a valid envelope: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.version != CURRENT_SCHEMA_VERSION {
        warn!(
            "Persisted cache entry version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION, envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope)
}
