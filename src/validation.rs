//! Cache-only validation status.
//!
//! Status icons are drawn far more often than anything is validated, so
//! [`ValidationReader::is_valid`] only ever reads the cache: a miss means
//! "not validated yet" and is reported as `false`. Whoever performs the real
//! remote check publishes its outcome with
//! [`ValidationReader::record_validation`].
//!
//! A positive hit is also a good hint that the user is working with that
//! resource, so the reader hands the resource to the prefetch queue to warm
//! its details.

use crate::backend::PersistentBackend;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::policy::ResourceKind;
use crate::prefetch::{LookupItem, PrefetchSink};
use crate::store::CacheStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The resource a validation result is about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValidationSubject {
    Catalog {
        catalog_id: String,
    },
    Offering {
        catalog_id: String,
        offering_id: String,
    },
    Flavor {
        catalog_id: String,
        offering_id: String,
        flavor: String,
    },
}

impl ValidationSubject {
    pub fn catalog(catalog_id: &str) -> Self {
        ValidationSubject::Catalog {
            catalog_id: catalog_id.to_string(),
        }
    }

    pub fn offering(catalog_id: &str, offering_id: &str) -> Self {
        ValidationSubject::Offering {
            catalog_id: catalog_id.to_string(),
            offering_id: offering_id.to_string(),
        }
    }

    pub fn flavor(catalog_id: &str, offering_id: &str, flavor: &str) -> Self {
        ValidationSubject::Flavor {
            catalog_id: catalog_id.to_string(),
            offering_id: offering_id.to_string(),
            flavor: flavor.to_string(),
        }
    }

    /// Subject from a validation kind and its identifiers.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if `kind` is not a validation kind or the
    /// number of identifiers is wrong for it.
    pub fn from_parts<S: AsRef<str>>(kind: ResourceKind, ids: &[S]) -> Result<Self> {
        let ids: Vec<&str> = ids.iter().map(|id| id.as_ref()).collect();
        match (kind, ids.as_slice()) {
            (ResourceKind::CatalogValidation, [c]) => Ok(Self::catalog(c)),
            (ResourceKind::OfferingValidation, [c, o]) => Ok(Self::offering(c, o)),
            (ResourceKind::FlavorValidation, [c, o, f]) => Ok(Self::flavor(c, o, f)),
            _ => Err(Error::InvalidKey(format!(
                "{} with {} identifier(s) is not a validation subject",
                kind,
                ids.len()
            ))),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            ValidationSubject::Catalog { .. } => ResourceKind::CatalogValidation,
            ValidationSubject::Offering { .. } => ResourceKind::OfferingValidation,
            ValidationSubject::Flavor { .. } => ResourceKind::FlavorValidation,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        match self {
            ValidationSubject::Catalog { catalog_id } => CacheKey::catalog_validation(catalog_id),
            ValidationSubject::Offering {
                catalog_id,
                offering_id,
            } => CacheKey::offering_validation(catalog_id, offering_id),
            ValidationSubject::Flavor {
                catalog_id,
                offering_id,
                flavor,
            } => CacheKey::flavor_validation(catalog_id, offering_id, flavor),
        }
    }

    /// The lookup that warms this subject's details.
    pub fn lookup_item(&self) -> LookupItem {
        match self {
            ValidationSubject::Catalog { catalog_id } => LookupItem::catalog(catalog_id),
            ValidationSubject::Offering {
                catalog_id,
                offering_id,
            } => LookupItem::offerings(catalog_id, offering_id),
            ValidationSubject::Flavor {
                catalog_id,
                offering_id,
                flavor,
            } => LookupItem::flavors(catalog_id, offering_id, flavor),
        }
    }
}

impl fmt::Display for ValidationSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// Stored outcome of one remote validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reads and records validation results.
pub struct ValidationReader<B: PersistentBackend> {
    store: Arc<CacheStore<B>>,
    prefetch: Option<Arc<dyn PrefetchSink>>,
}

impl<B: PersistentBackend> Clone for ValidationReader<B> {
    fn clone(&self) -> Self {
        ValidationReader {
            store: Arc::clone(&self.store),
            prefetch: self.prefetch.clone(),
        }
    }
}

impl<B: PersistentBackend> ValidationReader<B> {
    pub fn new(store: Arc<CacheStore<B>>) -> Self {
        ValidationReader {
            store,
            prefetch: None,
        }
    }

    /// Enqueue subjects with a positive cached result into `sink`.
    pub fn with_prefetch(mut self, sink: Arc<dyn PrefetchSink>) -> Self {
        self.prefetch = Some(sink);
        self
    }

    /// Cached validity of `subject`. Never fetches.
    ///
    /// `false` covers both "validated and invalid" and "unknown".
    pub async fn is_valid(&self, subject: &ValidationSubject) -> bool {
        let Some(record) = self.record(subject).await else {
            debug!("» No validation result for {}", subject);
            return false;
        };

        if record.is_valid {
            if let Some(sink) = &self.prefetch {
                sink.enqueue(subject.lookup_item());
            }
        }
        record.is_valid
    }

    /// Error message recorded with the last negative result, if any.
    pub async fn validation_error(&self, subject: &ValidationSubject) -> Option<String> {
        self.record(subject).await.and_then(|r| r.error)
    }

    /// Full cached record.
    pub async fn record(&self, subject: &ValidationSubject) -> Option<ValidationRecord> {
        self.store.get(&subject.cache_key()).await
    }

    /// Publish the outcome of a remote validation, replacing any earlier one.
    pub async fn record_validation(
        &self,
        subject: &ValidationSubject,
        is_valid: bool,
        error: Option<String>,
    ) {
        self.store
            .set(&subject.cache_key(), &ValidationRecord { is_valid, error })
            .await;
        debug!("✓ Recorded {} as {}", subject, if is_valid { "valid" } else { "invalid" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::policy::PolicyTable;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingSink {
        items: Mutex<Vec<LookupItem>>,
    }

    impl PrefetchSink for CollectingSink {
        fn enqueue(&self, item: LookupItem) {
            self.items.lock().unwrap().push(item);
        }
    }

    fn reader() -> (ValidationReader<InMemoryBackend>, Arc<CollectingSink>) {
        let store = Arc::new(CacheStore::new(InMemoryBackend::new(), PolicyTable::new()));
        let sink = Arc::new(CollectingSink::default());
        let reader = ValidationReader::new(store).with_prefetch(sink.clone());
        (reader, sink)
    }

    #[tokio::test]
    async fn test_miss_is_false_without_enqueue() {
        let (reader, sink) = reader();

        assert!(!reader.is_valid(&ValidationSubject::catalog("cat-1")).await);
        assert!(sink.items.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_valid_hit_enqueues_owner() {
        let (reader, sink) = reader();
        let subject = ValidationSubject::offering("cat-1", "off-1");

        reader.record_validation(&subject, true, None).await;

        assert!(reader.is_valid(&subject).await);
        assert_eq!(
            *sink.items.lock().unwrap(),
            vec![LookupItem::offerings("cat-1", "off-1")]
        );
    }

    #[tokio::test]
    async fn test_invalid_hit_keeps_error() {
        let (reader, sink) = reader();
        let subject = ValidationSubject::flavor("cat-1", "off-1", "basic");

        reader
            .record_validation(&subject, false, Some("flavor not found".to_string()))
            .await;

        assert!(!reader.is_valid(&subject).await);
        assert_eq!(
            reader.validation_error(&subject).await.as_deref(),
            Some("flavor not found")
        );
        assert!(sink.items.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_replaces_previous() {
        let (reader, _) = reader();
        let subject = ValidationSubject::catalog("cat-1");

        reader
            .record_validation(&subject, false, Some("403".to_string()))
            .await;
        reader.record_validation(&subject, true, None).await;

        assert_eq!(
            reader.record(&subject).await,
            Some(ValidationRecord {
                is_valid: true,
                error: None
            })
        );
    }

    /// Backend whose writes and deletes stall after taking effect.
    #[derive(Clone, Default)]
    struct SlowWrites {
        inner: InMemoryBackend,
    }

    impl PersistentBackend for SlowWrites {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> Result<()> {
            let written = self.inner.set(key, value).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            written
        }

        async fn delete(&self, key: &str) -> Result<()> {
            let deleted = self.inner.delete(key).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            deleted
        }
    }

    #[tokio::test]
    async fn test_rerecording_keeps_result_readable() {
        let store = Arc::new(CacheStore::new(SlowWrites::default(), PolicyTable::new()));
        let reader = ValidationReader::new(store);
        let subject = ValidationSubject::catalog("cat-1");
        reader.record_validation(&subject, true, None).await;

        let rerecord = tokio::spawn({
            let reader = reader.clone();
            let subject = subject.clone();
            async move { reader.record_validation(&subject, true, None).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(reader.is_valid(&subject).await);
        rerecord.await.unwrap();
        assert!(reader.is_valid(&subject).await);
    }

    #[test]
    fn test_from_parts() {
        assert_eq!(
            ValidationSubject::from_parts(ResourceKind::OfferingValidation, &["c", "o"]).unwrap(),
            ValidationSubject::offering("c", "o")
        );
        assert!(ValidationSubject::from_parts(ResourceKind::OfferingList, &["c"]).is_err());
        assert!(ValidationSubject::from_parts(ResourceKind::FlavorValidation, &["c"]).is_err());
    }

    #[test]
    fn test_subject_kind_matches_key() {
        let subject = ValidationSubject::flavor("c", "o", "f");
        assert_eq!(subject.cache_key().kind(), subject.kind());
        assert_eq!(subject.to_string(), "flavorValidation:c:o:f");
    }
}
