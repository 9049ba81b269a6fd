//! Persistent key-value backends.
//!
//! The cache store writes entries whose policy is persistent through a
//! [`PersistentBackend`]. Values are opaque strings (see
//! [`crate::serialization`] for the envelope format).

use crate::error::Result;
use std::future::Future;

#[cfg(feature = "file")]
pub mod file;
pub mod inmemory;

#[cfg(feature = "file")]
pub use file::FileBackend;
pub use inmemory::InMemoryBackend;

/// Trait for persistent key-value backend implementations.
///
/// Implementations: in-memory (tests, ephemeral sessions), a JSON file, or an
/// editor's own state storage.
///
/// **IMPORTANT:** All methods use `&self` to allow concurrent access.
/// Implementations should use interior mutability or external storage.
///
/// Returned futures must be `Send` so the prefetch scheduler can drive cache
/// reads from spawned tasks.
pub trait PersistentBackend: Send + Sync + Clone + 'static {
    /// Read a record.
    ///
    /// # Returns
    /// - `Ok(Some(raw))` - Record found
    /// - `Ok(None)` - No record under this key
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be read
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Write a record, replacing any previous one.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be written
    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<()>> + Send;

    /// Remove a record. Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the backend cannot be written
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// List every key (optional, used by a full cache clear).
    ///
    /// # Errors
    /// Returns `Err` if not implemented or the backend cannot be read
    fn keys(&self) -> impl Future<Output = Result<Vec<String>>> + Send {
        async {
            Err(crate::error::Error::NotImplemented(
                "keys not implemented for this backend".to_string(),
            ))
        }
    }

    /// Health check - verify the backend is accessible.
    ///
    /// # Errors
    /// Returns `Err` if the backend is not accessible
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send {
        async { Ok(true) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backend_default_health_check() {
        let backend = InMemoryBackend::new();
        assert!(backend
            .health_check()
            .await
            .expect("Failed to check health"));
    }
}
