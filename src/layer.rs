//! One-call wiring of the whole cache layer.

use crate::backend::PersistentBackend;
use crate::catalog::CatalogResourceClient;
use crate::config::CacheConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::Result;
use crate::observability::CacheMetrics;
use crate::prefetch::PrefetchScheduler;
use crate::service::CatalogCache;
use crate::store::CacheStore;
use crate::validation::ValidationReader;
use std::sync::Arc;

/// Store, coordinator, prefetch queue and validation reader sharing one
/// cache.
///
/// ```ignore
/// let layer = CacheLayer::new(FileBackend::new(state_dir.join("catalog-cache.json")),
///     client, &CacheConfig::from_json_str(&settings)?)?;
///
/// layer.prefetch.analyze_and_enqueue(&manifest);
/// let icon_ok = layer.validation.is_valid(&ValidationSubject::catalog(id)).await;
/// ```
pub struct CacheLayer<B: PersistentBackend, C: CatalogResourceClient> {
    pub cache: CatalogCache<B, C>,
    pub validation: ValidationReader<B>,
    pub prefetch: PrefetchScheduler<B, C>,
}

impl<B: PersistentBackend, C: CatalogResourceClient> CacheLayer<B, C> {
    /// Build the layer on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` outside a Tokio runtime or for an invalid
    /// prefetch configuration.
    pub fn new(backend: B, client: C, config: &CacheConfig) -> Result<Self> {
        Self::build(CacheStore::new(backend, config.policy_table()), client, config)
    }

    /// Same as [`CacheLayer::new`], reporting store activity to `metrics`.
    ///
    /// # Errors
    ///
    /// Same as [`CacheLayer::new`].
    pub fn with_metrics(
        backend: B,
        client: C,
        config: &CacheConfig,
        metrics: Box<dyn CacheMetrics>,
    ) -> Result<Self> {
        let store = CacheStore::new(backend, config.policy_table()).with_metrics(metrics);
        Self::build(store, client, config)
    }

    fn build(store: CacheStore<B>, client: C, config: &CacheConfig) -> Result<Self> {
        let store = Arc::new(store);
        let cache = CatalogCache::new(
            Arc::clone(&store),
            RequestCoordinator::new(),
            Arc::new(client),
        );
        let prefetch = PrefetchScheduler::new(cache.clone(), config.prefetch.clone())?;
        let validation = ValidationReader::new(store).with_prefetch(Arc::new(prefetch.clone()));

        info!("✓ Catalog cache layer ready");
        Ok(CacheLayer {
            cache,
            validation,
            prefetch,
        })
    }
}
