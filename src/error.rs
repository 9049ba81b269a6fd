//! Error types for the catalog cache.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the catalog cache.
///
/// Read paths (cache lookups, validation status) degrade to a miss instead of
/// returning most of these. They reach a caller only when that caller asked for
/// an explicit fetch or configured something incorrectly.
#[derive(Debug, Clone)]
pub enum Error {
    /// Remote catalog call failed (network, HTTP status, remote error).
    ///
    /// Transient by nature: the prefetch scheduler retries these with backoff
    /// and only logs them. Explicit fetches hand the message to the user.
    Fetch(String),

    /// A coordinated call did not settle within the caller's timeout.
    ///
    /// Only the caller that asked for the timeout sees this. The underlying
    /// fetch keeps running and still populates the cache.
    Timeout(String),

    /// Serialization failed when converting a value for storage.
    SerializationError(String),

    /// Deserialization failed when reading a stored value.
    ///
    /// **Recovery:** the entry is treated as absent and refetched.
    DeserializationError(String),

    /// Persistent backend error (disk, secret store, ...).
    BackendError(String),

    /// A cache key was built with the wrong number of identifier components
    /// for its resource kind.
    ///
    /// This is a programming error, not a runtime condition.
    InvalidKey(String),

    /// A coordinated key was awaited as a different value type than the one
    /// the in-flight operation produces.
    TypeMismatch(String),

    /// Persisted envelope was written by a different schema version.
    ///
    /// **Recovery:** the record is discarded and refetched on next access.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from persisted record)
        found: u32,
    },

    /// Invalid configuration (settings JSON, scheduler construction).
    ConfigError(String),

    /// Operation not supported by this client or backend.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Whether the prefetch scheduler may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_) | Error::Timeout(_) | Error::BackendError(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Fetch(msg) => write!(f, "Catalog request failed: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::InvalidKey(msg) => write!(f, "Invalid cache key: {}", msg),
            Error::TypeMismatch(msg) => write!(f, "Type mismatch: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Persisted entry version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_data() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
