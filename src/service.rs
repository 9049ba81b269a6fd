//! Fetch-and-cache composition for explicit catalog lookups.
//!
//! [`CatalogCache`] ties the three shared pieces together: it reads the
//! [`CacheStore`], and on a miss runs the remote fetch through the
//! [`RequestCoordinator`] so that concurrent lookups of the same resource make
//! one remote call, whose result is stored once for everyone.

use crate::backend::PersistentBackend;
use crate::catalog::{Catalog, CatalogResourceClient, Flavor, Offering};
use crate::coordinator::{CoordinateOptions, RequestCoordinator};
use crate::error::Result;
use crate::key::CacheKey;
use crate::store::CacheStore;
use crate::strategy::FetchStrategy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Cached, deduplicated access to the remote catalog.
///
/// Cheap to clone; clones share the store, the coordinator and the client.
///
/// # Example
///
/// ```ignore
/// use catalog_cache::{CatalogCache, CacheStore, FetchStrategy, RequestCoordinator};
/// use catalog_cache::backend::InMemoryBackend;
/// use catalog_cache::policy::PolicyTable;
/// use std::sync::Arc;
///
/// let store = Arc::new(CacheStore::new(InMemoryBackend::new(), PolicyTable::default()));
/// let cache = CatalogCache::new(store, RequestCoordinator::new(), Arc::new(client));
///
/// // Offering picker: cache first, one remote call however many pickers open.
/// let offerings = cache.offerings("cat-1", FetchStrategy::Refresh).await?;
/// ```
pub struct CatalogCache<B: PersistentBackend, C: CatalogResourceClient> {
    store: Arc<CacheStore<B>>,
    coordinator: RequestCoordinator,
    client: Arc<C>,
    options: CoordinateOptions,
}

impl<B: PersistentBackend, C: CatalogResourceClient> Clone for CatalogCache<B, C> {
    fn clone(&self) -> Self {
        CatalogCache {
            store: Arc::clone(&self.store),
            coordinator: self.coordinator.clone(),
            client: Arc::clone(&self.client),
            options: self.options.clone(),
        }
    }
}

impl<B: PersistentBackend, C: CatalogResourceClient> CatalogCache<B, C> {
    pub fn new(store: Arc<CacheStore<B>>, coordinator: RequestCoordinator, client: Arc<C>) -> Self {
        CatalogCache {
            store,
            coordinator,
            client,
            options: CoordinateOptions::default(),
        }
    }

    /// Default coordination options (e.g. a timeout) for every lookup.
    pub fn with_options(mut self, options: CoordinateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore<B>> {
        &self.store
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// All catalogs.
    ///
    /// # Errors
    ///
    /// Returns the remote failure (or `Error::Timeout`) when a fetch was
    /// needed and failed. `FetchStrategy::Fresh` never fails.
    pub async fn catalogs(&self, strategy: FetchStrategy) -> Result<Option<Vec<Catalog>>> {
        let client = Arc::clone(&self.client);
        self.load(CacheKey::catalog_list(), strategy, move || async move {
            client.list_catalogs().await
        })
        .await
    }

    /// Offerings of a catalog.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogCache::catalogs`].
    pub async fn offerings(
        &self,
        catalog_id: &str,
        strategy: FetchStrategy,
    ) -> Result<Option<Vec<Offering>>> {
        let client = Arc::clone(&self.client);
        let catalog = catalog_id.to_string();
        self.load(
            CacheKey::offering_list(catalog_id),
            strategy,
            move || async move { client.list_offerings(&catalog).await },
        )
        .await
    }

    /// One offering.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogCache::catalogs`].
    pub async fn offering(
        &self,
        catalog_id: &str,
        offering_id: &str,
        strategy: FetchStrategy,
    ) -> Result<Option<Offering>> {
        let client = Arc::clone(&self.client);
        let (catalog, offering) = (catalog_id.to_string(), offering_id.to_string());
        self.load(
            CacheKey::offering_details(catalog_id, offering_id),
            strategy,
            move || async move { client.get_offering(&catalog, &offering).await },
        )
        .await
    }

    /// Flavors of an offering.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogCache::catalogs`].
    pub async fn flavors(
        &self,
        catalog_id: &str,
        offering_id: &str,
        strategy: FetchStrategy,
    ) -> Result<Option<Vec<Flavor>>> {
        let client = Arc::clone(&self.client);
        let (catalog, offering) = (catalog_id.to_string(), offering_id.to_string());
        self.load(
            CacheKey::flavor_list(catalog_id, offering_id),
            strategy,
            move || async move { client.list_flavors(&catalog, &offering).await },
        )
        .await
    }

    /// One flavor of an offering.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogCache::catalogs`].
    pub async fn flavor(
        &self,
        catalog_id: &str,
        offering_id: &str,
        flavor_name: &str,
        strategy: FetchStrategy,
    ) -> Result<Option<Flavor>> {
        let client = Arc::clone(&self.client);
        let (catalog, offering, flavor) = (
            catalog_id.to_string(),
            offering_id.to_string(),
            flavor_name.to_string(),
        );
        self.load(
            CacheKey::flavor_details(catalog_id, offering_id, flavor_name),
            strategy,
            move || async move { client.get_flavor(&catalog, &offering, &flavor).await },
        )
        .await
    }

    /// Raw API response for a path.
    ///
    /// # Errors
    ///
    /// Same as [`CatalogCache::catalogs`], plus `Error::NotImplemented` when
    /// the client has no generic endpoint.
    pub async fn api_response(&self, path: &str, strategy: FetchStrategy) -> Result<Option<Value>> {
        let client = Arc::clone(&self.client);
        let owned = path.to_string();
        self.load(CacheKey::api_response(path), strategy, move || async move {
            client.get_json(&owned).await
        })
        .await
    }

    async fn load<T, F, Fut>(
        &self,
        key: CacheKey,
        strategy: FetchStrategy,
        fetch: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let timer = Instant::now();
        debug!("» Lookup {} (strategy: {})", key, strategy);

        if strategy.reads_cache() {
            if let Some(cached) = self.store.get::<T>(&key).await {
                return Ok(Some(cached));
            }
        }

        if !strategy.may_fetch() {
            debug!("✗ Cache miss ({} strategy) - no fallback", strategy);
            return Ok(None);
        }

        if strategy == FetchStrategy::Invalidate {
            self.store.clear(&key).await;
            self.coordinator.forget(key.as_str());
        }

        let store = Arc::clone(&self.store);
        let populate = key.clone();
        let fetched = self
            .coordinator
            .coordinate(
                key.as_str(),
                move || async move {
                    // An Invalidate or a clear that lands while this fetch
                    // runs makes its result stale for the cache.
                    let ticket = store.begin_write();
                    let value = fetch().await?;
                    store.set_if_current(&populate, &value, ticket).await;
                    Ok(value)
                },
                self.options.clone(),
            )
            .await;

        match fetched {
            Ok(value) => {
                info!("✓ Loaded {} in {:?}", key, timer.elapsed());
                Ok(Some(value))
            }
            Err(e) => {
                warn!("✗ Loading {} failed: {}", key, e);
                Err(e)
            }
        }
    }
}
