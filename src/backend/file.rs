//! JSON file backend.
//!
//! All records live in one JSON object file (`{"key": "raw record", ...}`).
//! The file is read once on first access and rewritten after every change.
//! Writes go through a temporary file and a rename so a crash never leaves a
//! half-written file behind.

use super::PersistentBackend;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Persistent backend storing every record in a single JSON file.
#[derive(Clone)]
pub struct FileBackend {
    path: Arc<PathBuf>,
    records: Arc<Mutex<Option<BTreeMap<String, String>>>>,
}

impl FileBackend {
    /// Backend over `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBackend {
            path: Arc::new(path.into()),
            records: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&*self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::BackendError(format!(
                    "Cache file {} is corrupt: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn flush(&self, records: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string(records)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &*self.path).await?;
        Ok(())
    }
}

impl PersistentBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.records.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        let value = guard.as_ref().and_then(|records| records.get(key).cloned());
        debug!(
            "✓ File GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut guard = self.records.lock().await;
        let mut records = match guard.take() {
            Some(records) => records,
            None => self.load().await?,
        };
        records.insert(key.to_string(), value);
        let flushed = self.flush(&records).await;
        *guard = Some(records);
        flushed?;
        debug!("✓ File SET {}", key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self.records.lock().await;
        let mut records = match guard.take() {
            Some(records) => records,
            None => self.load().await?,
        };
        let removed = records.remove(key).is_some();
        let flushed = if removed {
            self.flush(&records).await
        } else {
            Ok(())
        };
        *guard = Some(records);
        flushed?;
        debug!("✓ File DELETE {}", key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut guard = self.records.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard
            .as_ref()
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<bool> {
        let mut guard = self.records.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(true)
    }
}
