//! In-memory persistent backend.
//!
//! Keeps records in a shared DashMap. Clones share the same map, so a "restart"
//! can be simulated by building a new cache store over a clone of the backend.

use super::PersistentBackend;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe in-memory backend.
///
/// # Example
///
/// ```no_run
/// use catalog_cache::backend::{InMemoryBackend, PersistentBackend};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("catalogCache.catalogs", "{}".to_string()).await?;
///     assert!(backend.get("catalogCache.catalogs").await?.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, String>>,
}

impl InMemoryBackend {
    /// Create a new, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl PersistentBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.store.get(key).map(|v| v.value().clone());
        debug!(
            "✓ InMemory GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.store.insert(key.to_string(), value);
        debug!("✓ InMemory SET {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.store.iter().map(|entry| entry.key().clone()).collect())
    }
}
