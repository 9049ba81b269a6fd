//! Integration tests for catalog-cache
//!
//! These tests verify end-to-end behavior across store, coordinator,
//! validation reader and prefetch scheduler.

use catalog_cache::backend::InMemoryBackend;
use catalog_cache::catalog::{Catalog, Flavor, Offering};
use catalog_cache::config::{CacheConfig, MaxItemsPerType, PrefetchConfig};
use catalog_cache::coordinator::CoordinateOptions;
use catalog_cache::observability::CountingMetrics;
use catalog_cache::policy::{Policy, PolicyTable, ResourceKind};
use catalog_cache::{
    CacheKey, CacheLayer, CacheStore, CatalogResourceClient, Error, FetchStrategy, LookupItem,
    Result, ValidationSubject,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Remote catalog stand-in that counts every call.
#[derive(Default)]
struct MockCatalogClient {
    catalogs: AtomicUsize,
    offering_lists: AtomicUsize,
    offerings: AtomicUsize,
    flavor_lists: AtomicUsize,
    flavors: AtomicUsize,
    failing_offerings: HashSet<String>,
    delay: Duration,
}

impl MockCatalogClient {
    fn with_delay(delay: Duration) -> Self {
        MockCatalogClient {
            delay,
            ..Default::default()
        }
    }

    fn failing(ids: &[&str]) -> Self {
        MockCatalogClient {
            failing_offerings: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    fn total_calls(&self) -> usize {
        [
            &self.catalogs,
            &self.offering_lists,
            &self.offerings,
            &self.flavor_lists,
            &self.flavors,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl CatalogResourceClient for MockCatalogClient {
    async fn list_catalogs(&self) -> Result<Vec<Catalog>> {
        self.catalogs.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(vec![Catalog {
            id: "cat-1".to_string(),
            label: "Landing zones".to_string(),
            ..Default::default()
        }])
    }

    async fn list_offerings(&self, catalog_id: &str) -> Result<Vec<Offering>> {
        self.offering_lists.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(vec![Offering {
            id: "off-1".to_string(),
            name: "vpc".to_string(),
            catalog_id: catalog_id.to_string(),
            ..Default::default()
        }])
    }

    async fn get_offering(&self, catalog_id: &str, offering_id: &str) -> Result<Offering> {
        self.offerings.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.failing_offerings.contains(offering_id) {
            return Err(Error::Fetch(format!("offering {} not found", offering_id)));
        }
        Ok(Offering {
            id: offering_id.to_string(),
            catalog_id: catalog_id.to_string(),
            ..Default::default()
        })
    }

    async fn list_flavors(&self, _catalog_id: &str, _offering_id: &str) -> Result<Vec<Flavor>> {
        self.flavor_lists.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(vec![])
    }

    async fn get_flavor(
        &self,
        _catalog_id: &str,
        _offering_id: &str,
        flavor: &str,
    ) -> Result<Flavor> {
        self.flavors.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(Flavor {
            name: flavor.to_string(),
            ..Default::default()
        })
    }
}

fn quick_prefetch() -> PrefetchConfig {
    PrefetchConfig::default()
        .with_item_delay(Duration::ZERO)
        .with_retries(1, Duration::from_millis(10))
}

fn layer(
    backend: InMemoryBackend,
    client: MockCatalogClient,
    prefetch: PrefetchConfig,
) -> CacheLayer<InMemoryBackend, MockCatalogClient> {
    let config = CacheConfig {
        prefetch,
        ..Default::default()
    };
    CacheLayer::new(backend, client, &config).expect("Failed to build cache layer")
}

/// Test 1: Entries expire after their kind's TTL
#[tokio::test]
async fn test_ttl_expiry() {
    init_logging();
    let policies = PolicyTable::new().with_policy(
        ResourceKind::OfferingList,
        Policy::ephemeral(Duration::from_millis(100)),
    );
    let store = CacheStore::new(InMemoryBackend::new(), policies);
    let key = CacheKey::offering_list("cat-1");

    store.set(&key, &vec!["off-1"]).await;
    assert_eq!(store.get::<Vec<String>>(&key).await, Some(vec!["off-1".to_string()]));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.get::<Vec<String>>(&key).await, None);
}

/// Test 2: N concurrent explicit lookups make one remote call
#[tokio::test]
async fn test_concurrent_lookups_deduplicated() {
    init_logging();
    let layer = layer(
        InMemoryBackend::new(),
        MockCatalogClient::with_delay(Duration::from_millis(50)),
        quick_prefetch(),
    );

    let lookups = (0..10).map(|_| layer.cache.offerings("cat-1", FetchStrategy::Refresh));
    let results = futures::future::join_all(lookups).await;

    assert_eq!(layer.cache.client().offering_lists.load(Ordering::SeqCst), 1);
    for result in results {
        let offerings = result.expect("Lookup failed").expect("Refresh never returns None");
        assert_eq!(offerings[0].id, "off-1");
    }
}

/// Test 3: A caller that times out does not cancel the fetch
#[tokio::test]
async fn test_timeout_keeps_fetch_running() {
    init_logging();
    let layer = layer(
        InMemoryBackend::new(),
        MockCatalogClient::with_delay(Duration::from_millis(100)),
        quick_prefetch(),
    );
    let impatient = layer
        .cache
        .clone()
        .with_options(CoordinateOptions::default().with_timeout(Duration::from_millis(10)));

    let result = impatient.catalogs(FetchStrategy::Refresh).await;
    assert!(matches!(result, Err(Error::Timeout(_))));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let cached = layer
        .cache
        .catalogs(FetchStrategy::Fresh)
        .await
        .expect("Fresh never fails");
    assert_eq!(cached.map(|c| c.len()), Some(1));
    assert_eq!(layer.cache.client().catalogs.load(Ordering::SeqCst), 1);
}

/// Test 4: Explicit fetch failures reach the caller with a readable message
#[tokio::test]
async fn test_explicit_failure_surfaces() {
    init_logging();
    let layer = layer(
        InMemoryBackend::new(),
        MockCatalogClient::failing(&["off-9"]),
        quick_prefetch(),
    );

    let err = layer
        .cache
        .offering("cat-1", "off-9", FetchStrategy::Refresh)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Catalog request failed: offering off-9 not found");
}

/// Test 5: Persistent kinds survive a restart through the backend
#[tokio::test]
async fn test_persistence_round_trip() {
    init_logging();
    let backend = InMemoryBackend::new();

    let first = layer(backend.clone(), MockCatalogClient::default(), quick_prefetch());
    first
        .cache
        .catalogs(FetchStrategy::Refresh)
        .await
        .expect("Initial fetch failed");
    first
        .validation
        .record_validation(&ValidationSubject::catalog("cat-1"), true, None)
        .await;

    // Fresh instance, same backend.
    let second = layer(backend, MockCatalogClient::default(), quick_prefetch());
    let catalogs = second
        .cache
        .catalogs(FetchStrategy::Fresh)
        .await
        .expect("Fresh never fails")
        .expect("Catalog list should rehydrate");

    assert_eq!(catalogs[0].label, "Landing zones");
    assert!(second.validation.is_valid(&ValidationSubject::catalog("cat-1")).await);
    assert_eq!(second.cache.client().catalogs.load(Ordering::SeqCst), 0);
}

/// Test 6: Ephemeral kinds do not survive a restart
#[tokio::test]
async fn test_ephemeral_not_persisted() {
    init_logging();
    let backend = InMemoryBackend::new();

    let first = layer(backend.clone(), MockCatalogClient::default(), quick_prefetch());
    first
        .cache
        .offerings("cat-1", FetchStrategy::Refresh)
        .await
        .expect("Initial fetch failed");

    let second = layer(backend, MockCatalogClient::default(), quick_prefetch());
    let offerings = second
        .cache
        .offerings("cat-1", FetchStrategy::Fresh)
        .await
        .expect("Fresh never fails");
    assert!(offerings.is_none());
}

/// Test 7: Reading validation status never fetches
#[tokio::test]
async fn test_validation_read_never_fetches() {
    init_logging();
    let layer = layer(InMemoryBackend::new(), MockCatalogClient::default(), quick_prefetch());

    for subject in [
        ValidationSubject::catalog("cat-1"),
        ValidationSubject::offering("cat-1", "off-1"),
        ValidationSubject::flavor("cat-1", "off-1", "basic"),
    ] {
        assert!(!layer.validation.is_valid(&subject).await);
    }
    layer.prefetch.wait_idle().await;

    assert_eq!(layer.cache.client().total_calls(), 0);
    assert_eq!(layer.prefetch.stats().enqueued, 0);
}

/// Test 8: A positive validation hit warms the owner's details
#[tokio::test(start_paused = true)]
async fn test_valid_hit_triggers_prefetch() {
    init_logging();
    let layer = layer(InMemoryBackend::new(), MockCatalogClient::default(), quick_prefetch());
    let subject = ValidationSubject::catalog("cat-1");

    layer.validation.record_validation(&subject, true, None).await;
    assert!(layer.validation.is_valid(&subject).await);
    layer.prefetch.wait_idle().await;

    assert_eq!(layer.cache.client().offering_lists.load(Ordering::SeqCst), 1);
    assert!(layer
        .cache
        .store()
        .contains_live(&CacheKey::offering_list("cat-1")));
}

/// Test 9: Equal items enqueued twice are processed once
#[tokio::test(start_paused = true)]
async fn test_prefetch_idempotence() {
    init_logging();
    let layer = layer(InMemoryBackend::new(), MockCatalogClient::default(), quick_prefetch());

    layer.prefetch.enqueue(LookupItem::flavors("cat-1", "off-1", "basic"));
    layer.prefetch.enqueue(LookupItem::flavors("cat-1", "off-1", "basic"));
    layer.prefetch.wait_idle().await;

    assert_eq!(layer.cache.client().flavors.load(Ordering::SeqCst), 1);
}

/// Test 10: One large document is capped per kind in a single pass
#[tokio::test(start_paused = true)]
async fn test_prefetch_volume_bounded() {
    init_logging();
    let layer = layer(
        InMemoryBackend::new(),
        MockCatalogClient::default(),
        quick_prefetch().with_max_items_per_type(MaxItemsPerType {
            catalogs: 20,
            offerings: 50,
            flavors: 100,
        }),
    );
    let dependencies: Vec<Value> = (0..500)
        .map(|i| json!({"catalog_id": "cat-1", "id": format!("off-{}", i), "name": "dep"}))
        .collect();
    let document = json!({"products": [{"flavors": [{"dependencies": dependencies}]}]});

    layer.prefetch.analyze_and_enqueue(&document);
    layer.prefetch.wait_idle().await;

    let client = layer.cache.client();
    assert_eq!(client.offerings.load(Ordering::SeqCst), 50);
    assert_eq!(client.offering_lists.load(Ordering::SeqCst), 1);
    let stats = layer.prefetch.stats();
    assert_eq!(stats.passes, 1);
    assert_eq!(stats.dropped, 450);
}

/// Test 11: One failing item does not stop the others
#[tokio::test(start_paused = true)]
async fn test_prefetch_partial_failure() {
    init_logging();
    let layer = layer(
        InMemoryBackend::new(),
        MockCatalogClient::failing(&["off-3"]),
        quick_prefetch(),
    );

    for i in 1..=10 {
        layer
            .prefetch
            .enqueue(LookupItem::offerings("cat-1", &format!("off-{}", i)));
    }
    layer.prefetch.wait_idle().await;

    let store = layer.cache.store();
    for i in 1..=10 {
        let key = CacheKey::offering_details("cat-1", &format!("off-{}", i));
        let cached = store.contains_live(&key);
        assert_eq!(cached, i != 3, "off-{} cached state", i);
    }
    let stats = layer.prefetch.stats();
    assert_eq!(stats.cached, 9);
    assert_eq!(stats.failed, 1);
}

/// Test 12: Invalidate forces a new remote call
#[tokio::test]
async fn test_invalidate_refetches() {
    init_logging();
    let layer = layer(InMemoryBackend::new(), MockCatalogClient::default(), quick_prefetch());

    for strategy in [
        FetchStrategy::Refresh,
        FetchStrategy::Refresh,
        FetchStrategy::Invalidate,
    ] {
        layer
            .cache
            .flavors("cat-1", "off-1", strategy)
            .await
            .expect("Lookup failed");
    }

    assert_eq!(layer.cache.client().flavor_lists.load(Ordering::SeqCst), 2);
}

/// Test 13: clear_all drops memory and persisted records
#[tokio::test]
async fn test_clear_all() {
    init_logging();
    let backend = InMemoryBackend::new();
    let layer = layer(backend.clone(), MockCatalogClient::default(), quick_prefetch());

    layer
        .cache
        .catalogs(FetchStrategy::Refresh)
        .await
        .expect("Fetch failed");
    assert!(!backend.is_empty());

    layer.cache.store().clear_all().await;

    assert!(layer.cache.store().is_empty());
    assert!(backend.is_empty());
}

/// Test 14: Metrics see hits, misses and sets
#[tokio::test]
async fn test_metrics_hooks() {
    init_logging();
    let metrics = Arc::new(CountingMetrics::default());
    let layer = CacheLayer::with_metrics(
        InMemoryBackend::new(),
        MockCatalogClient::default(),
        &CacheConfig::default(),
        Box::new(metrics.clone()),
    )
    .expect("Failed to build cache layer");

    layer
        .cache
        .offerings("cat-1", FetchStrategy::Refresh)
        .await
        .expect("Fetch failed");
    layer
        .cache
        .offerings("cat-1", FetchStrategy::Refresh)
        .await
        .expect("Fetch failed");

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sets, 1);
    assert_eq!(snapshot.hits, 1);
    assert_eq!(snapshot.misses, 1);
}
