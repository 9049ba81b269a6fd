//! Background prefetch queue.
//!
//! At most one driver task exists per scheduler. It is started by the first
//! enqueue into an idle scheduler and keeps running passes until the queue is
//! empty:
//!
//! ```text
//! enqueue ──► queue ──► driver: wait for throttle ──► take queue ──► pass
//!                ▲                                                  │
//!                └────────── items that arrived meanwhile ◄─────────┘
//! ```
//!
//! The first pass starts immediately, later ones start no sooner than
//! `throttle_interval` after the previous one. Enqueues during a pass simply
//! land in the queue for the next pass, so passes never overlap.

use crate::backend::PersistentBackend;
use crate::catalog::CatalogResourceClient;
use crate::config::PrefetchConfig;
use crate::error::{Error, Result};
use crate::prefetch::lookup::{analyze, LookupItem, LookupKind};
use crate::service::CatalogCache;
use crate::strategy::FetchStrategy;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cumulative scheduler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Items accepted into the queue.
    pub enqueued: u64,
    /// Enqueues ignored (already queued, already cached, or incomplete).
    pub skipped: u64,
    /// Items warmed successfully.
    pub cached: u64,
    /// Items that failed every attempt.
    pub failed: u64,
    /// Items left out of a pass by the per-kind cap.
    pub dropped: u64,
    /// Passes run.
    pub passes: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    skipped: AtomicU64,
    cached: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    passes: AtomicU64,
}

#[derive(Default)]
struct QueueState {
    queue: Vec<LookupItem>,
    queued: HashSet<LookupItem>,
    driver_running: bool,
    last_pass: Option<Instant>,
}

struct Inner<B: PersistentBackend, C: CatalogResourceClient> {
    cache: CatalogCache<B, C>,
    config: PrefetchConfig,
    state: Mutex<QueueState>,
    counters: Counters,
    busy: watch::Sender<bool>,
    runtime: Handle,
}

/// Warms the cache in the background from document references.
///
/// Cheap to clone; clones share the queue.
pub struct PrefetchScheduler<B: PersistentBackend, C: CatalogResourceClient> {
    inner: Arc<Inner<B, C>>,
}

impl<B: PersistentBackend, C: CatalogResourceClient> Clone for PrefetchScheduler<B, C> {
    fn clone(&self) -> Self {
        PrefetchScheduler {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: PersistentBackend, C: CatalogResourceClient> PrefetchScheduler<B, C> {
    /// Create a scheduler bound to the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` when called outside a Tokio runtime or
    /// when `config` is invalid.
    pub fn new(cache: CatalogCache<B, C>, config: PrefetchConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            Error::ConfigError(format!("Prefetch scheduler needs a Tokio runtime: {}", e))
        })?;
        let (busy, _) = watch::channel(false);

        Ok(PrefetchScheduler {
            inner: Arc::new(Inner {
                cache,
                config,
                state: Mutex::new(QueueState::default()),
                counters: Counters::default(),
                busy,
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.inner.config
    }

    /// Queue one item. Never blocks and never fails.
    ///
    /// No-op when an equal item is already queued or its cache entry is live.
    pub fn enqueue(&self, item: LookupItem) {
        self.enqueue_all(std::iter::once(item));
    }

    /// Queue every lookup referenced by `document`.
    pub fn analyze_and_enqueue(&self, document: &Value) {
        let items = analyze(document);
        debug!("» Document references {} lookup(s)", items.len());
        self.enqueue_all(items);
    }

    fn enqueue_all(&self, items: impl IntoIterator<Item = LookupItem>) {
        let store = self.inner.cache.store();
        let counters = &self.inner.counters;

        let mut state = self.inner.lock_state();
        let mut accepted = 0u64;
        for item in items {
            let live = match item.cache_key() {
                Some(key) => store.contains_live(&key),
                None => {
                    debug!("✗ Skipping {}: missing owning identifiers", item);
                    counters.skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            if live || state.queued.contains(&item) {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            state.queued.insert(item.clone());
            state.queue.push(item);
            accepted += 1;
        }
        counters.enqueued.fetch_add(accepted, Ordering::Relaxed);

        if accepted > 0 && !state.driver_running {
            state.driver_running = true;
            self.inner.busy.send_replace(true);
            let inner = Arc::clone(&self.inner);
            self.inner.runtime.spawn(async move { inner.drive().await });
        }
    }

    /// Number of items waiting for the next pass.
    pub fn queued_len(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// Discard every queued item. Returns how many were removed.
    pub fn clear_queue(&self) -> usize {
        let mut state = self.inner.lock_state();
        state.queued.clear();
        let removed = state.queue.len();
        state.queue.clear();
        removed
    }

    /// Wait until no pass is running and the queue is empty.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    pub fn stats(&self) -> PrefetchStats {
        let c = &self.inner.counters;
        PrefetchStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            cached: c.cached.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            passes: c.passes.load(Ordering::Relaxed),
        }
    }
}

impl<B: PersistentBackend, C: CatalogResourceClient> Inner<B, C> {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // Queue state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let last_pass = {
                let mut state = self.lock_state();
                if self.finish_if_empty(&mut state) {
                    return;
                }
                state.last_pass
            };
            if let Some(last) = last_pass {
                tokio::time::sleep_until(last + self.config.throttle_interval()).await;
            }

            let batch = {
                let mut state = self.lock_state();
                if self.finish_if_empty(&mut state) {
                    return;
                }
                state.queued.clear();
                state.last_pass = Some(Instant::now());
                std::mem::take(&mut state.queue)
            };

            Arc::clone(&self).run_pass(batch).await;
        }
    }

    /// Retire the driver when there is nothing left to do.
    fn finish_if_empty(&self, state: &mut QueueState) -> bool {
        if !state.queue.is_empty() {
            return false;
        }
        state.driver_running = false;
        self.busy.send_replace(false);
        true
    }

    async fn run_pass(self: Arc<Self>, mut batch: Vec<LookupItem>) {
        let pass = self.counters.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = Instant::now();

        batch.sort_by(|a, b| b.priority.cmp(&a.priority));
        let caps = &self.config.max_items_per_type;
        let mut taken = [0usize; 3];
        let mut selected = Vec::with_capacity(batch.len());
        let mut dropped = 0u64;
        for item in batch {
            let cap = match item.kind {
                LookupKind::Catalog => caps.catalogs,
                LookupKind::Offerings => caps.offerings,
                LookupKind::Flavors => caps.flavors,
            };
            let slot = &mut taken[item.kind.index()];
            if *slot < cap {
                *slot += 1;
                selected.push(item);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("» Pass #{}: {} item(s) over the per-kind cap", pass, dropped);
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        }

        let total = selected.len();
        debug!("» Prefetch pass #{} started with {} item(s)", pass, total);

        stream::iter(selected)
            .for_each_concurrent(self.config.max_concurrency, |item| {
                let inner = Arc::clone(&self);
                async move { inner.process(item).await }
            })
            .await;

        debug!(
            "✓ Prefetch pass #{} finished {} item(s) in {:?}",
            pass,
            total,
            timer.elapsed()
        );
    }

    async fn process(&self, item: LookupItem) {
        let mut attempt = 0u32;
        loop {
            tokio::time::sleep(self.config.item_delay()).await;

            match self.warm(&item).await {
                Ok(()) => {
                    self.counters.cached.fetch_add(1, Ordering::Relaxed);
                    debug!("✓ Prefetched {}", item);
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff(attempt);
                    debug!(
                        "✗ Prefetch of {} failed ({}), retry {} in {:?}",
                        item, e, attempt, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "✗ Prefetch of {} dropped after {} attempt(s): {}",
                        item,
                        attempt + 1,
                        e
                    );
                    return;
                }
            }
        }
    }

    async fn warm(&self, item: &LookupItem) -> Result<()> {
        let cache = &self.cache;
        let catalog = item.context.catalog_id.as_deref();
        let offering = item.context.offering_id.as_deref();
        let refresh = FetchStrategy::Refresh;

        match (item.kind, catalog, offering) {
            (LookupKind::Catalog, _, _) => cache.offerings(&item.value, refresh).await.map(drop),
            (LookupKind::Offerings, Some(catalog), _) => {
                cache.offering(catalog, &item.value, refresh).await.map(drop)
            }
            (LookupKind::Flavors, Some(catalog), Some(offering)) => cache
                .flavor(catalog, offering, &item.value, refresh)
                .await
                .map(drop),
            _ => Err(Error::InvalidKey(format!(
                "{} lacks owning identifiers",
                item
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::catalog::{Catalog, Flavor, Offering};
    use crate::config::MaxItemsPerType;
    use crate::coordinator::RequestCoordinator;
    use crate::store::CacheStore;
    use crate::policy::PolicyTable;
    use dashmap::DashMap;
    use std::time::Duration;

    /// Records call times; fails an offering `failures[id]` times first and
    /// rejects ids in `unsupported` outright.
    #[derive(Default)]
    struct RecordingClient {
        calls: DashMap<String, Vec<Instant>>,
        failures: DashMap<String, u32>,
        unsupported: DashMap<String, ()>,
    }

    impl RecordingClient {
        fn record(&self, id: &str) -> Result<()> {
            self.calls.entry(id.to_string()).or_default().push(Instant::now());
            if self.unsupported.contains_key(id) {
                return Err(Error::NotImplemented(format!("no endpoint for {}", id)));
            }
            if let Some(mut remaining) = self.failures.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::Fetch(format!("503 for {}", id)));
                }
            }
            Ok(())
        }

        fn count(&self, id: &str) -> usize {
            self.calls.get(id).map(|c| c.len()).unwrap_or(0)
        }
    }

    impl CatalogResourceClient for RecordingClient {
        async fn list_catalogs(&self) -> Result<Vec<Catalog>> {
            Ok(vec![])
        }

        async fn list_offerings(&self, catalog_id: &str) -> Result<Vec<Offering>> {
            self.record(catalog_id)?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![])
        }

        async fn get_offering(&self, catalog_id: &str, offering_id: &str) -> Result<Offering> {
            self.record(offering_id)?;
            Ok(Offering {
                id: offering_id.to_string(),
                catalog_id: catalog_id.to_string(),
                ..Default::default()
            })
        }

        async fn list_flavors(&self, _catalog_id: &str, _offering_id: &str) -> Result<Vec<Flavor>> {
            Ok(vec![])
        }

        async fn get_flavor(&self, _c: &str, _o: &str, flavor: &str) -> Result<Flavor> {
            self.record(flavor)?;
            Ok(Flavor {
                name: flavor.to_string(),
                ..Default::default()
            })
        }
    }

    fn scheduler(
        config: PrefetchConfig,
    ) -> PrefetchScheduler<InMemoryBackend, RecordingClient> {
        let store = Arc::new(CacheStore::new(InMemoryBackend::new(), PolicyTable::new()));
        let cache = CatalogCache::new(
            store,
            RequestCoordinator::new(),
            Arc::new(RecordingClient::default()),
        );
        PrefetchScheduler::new(cache, config).expect("Failed to create scheduler")
    }

    fn client(s: &PrefetchScheduler<InMemoryBackend, RecordingClient>) -> &RecordingClient {
        s.inner.cache.client()
    }

    fn fast() -> PrefetchConfig {
        PrefetchConfig::default()
            .with_item_delay(Duration::ZERO)
            .with_throttle_interval(Duration::from_millis(1000))
            .with_retries(2, Duration::from_millis(10))
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let store = Arc::new(CacheStore::new(InMemoryBackend::new(), PolicyTable::new()));
        let cache = CatalogCache::new(
            store,
            RequestCoordinator::new(),
            Arc::new(RecordingClient::default()),
        );
        let err = PrefetchScheduler::new(cache, PrefetchConfig::default()).err();
        assert!(matches!(err, Some(Error::ConfigError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_enqueue_processed_once() {
        let s = scheduler(fast());

        s.enqueue(LookupItem::offerings("cat-1", "off-1"));
        s.enqueue(LookupItem::offerings("cat-1", "off-1"));
        assert_eq!(s.queued_len(), 1);
        s.wait_idle().await;

        assert_eq!(client(&s).count("off-1"), 1);
        let stats = s.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.cached, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_skips_live_entries() {
        let s = scheduler(fast());

        s.enqueue(LookupItem::offerings("cat-1", "off-1"));
        s.wait_idle().await;
        s.enqueue(LookupItem::offerings("cat-1", "off-1"));

        assert_eq!(s.queued_len(), 0);
        assert_eq!(client(&s).count("off-1"), 1);
        assert_eq!(s.stats().passes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passes_are_throttled() {
        let s = scheduler(fast());

        s.enqueue(LookupItem::catalog("cat-a"));
        s.wait_idle().await;
        s.enqueue(LookupItem::catalog("cat-b"));
        s.wait_idle().await;

        let first = client(&s).calls.get("cat-a").unwrap()[0];
        let second = client(&s).calls.get("cat-b").unwrap()[0];
        assert!(second.duration_since(first) >= Duration::from_millis(1000));
        assert_eq!(s.stats().passes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueues_during_pass_are_coalesced() {
        let s = scheduler(fast());

        s.enqueue(LookupItem::catalog("cat-a"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        // cat-a's fetch is still running.
        for id in ["cat-b", "cat-c", "cat-d"] {
            s.enqueue(LookupItem::catalog(id));
        }
        s.wait_idle().await;

        assert_eq!(s.stats().passes, 2);
        for id in ["cat-a", "cat-b", "cat-c", "cat-d"] {
            assert_eq!(client(&s).count(id), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_kind_cap_drops_excess() {
        let s = scheduler(fast().with_max_items_per_type(MaxItemsPerType {
            catalogs: 20,
            offerings: 2,
            flavors: 100,
        }));

        for i in 0..5 {
            s.enqueue(LookupItem::offerings("cat-1", &format!("off-{}", i)));
        }
        s.wait_idle().await;

        let stats = s.stats();
        assert_eq!(stats.cached, 2);
        assert_eq!(stats.dropped, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_under_cap() {
        let s = scheduler(fast().with_max_concurrency(1).with_max_items_per_type(
            MaxItemsPerType {
                catalogs: 20,
                offerings: 1,
                flavors: 100,
            },
        ));

        s.enqueue(LookupItem::offerings("cat-1", "low"));
        s.enqueue(LookupItem::offerings("cat-1", "high").with_priority(9));
        s.wait_idle().await;

        assert_eq!(client(&s).count("high"), 1);
        assert_eq!(client(&s).count("low"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let s = scheduler(fast());
        client(&s).failures.insert("off-1".to_string(), 2);

        s.enqueue(LookupItem::offerings("cat-1", "off-1"));
        s.wait_idle().await;

        assert_eq!(client(&s).count("off-1"), 3);
        assert_eq!(s.stats().cached, 1);
        assert_eq!(s.stats().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_item_only() {
        let s = scheduler(fast());
        client(&s).failures.insert("bad".to_string(), u32::MAX);

        s.enqueue(LookupItem::offerings("cat-1", "bad"));
        s.enqueue(LookupItem::offerings("cat-1", "good"));
        s.wait_idle().await;

        assert_eq!(client(&s).count("bad"), 3);
        assert_eq!(client(&s).count("good"), 1);
        let stats = s.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cached, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let s = scheduler(fast());
        client(&s).unsupported.insert("legacy".to_string(), ());

        s.enqueue(LookupItem::offerings("cat-1", "legacy"));
        s.wait_idle().await;

        assert_eq!(client(&s).count("legacy"), 1);
        let stats = s.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cached, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_item_is_skipped() {
        let s = scheduler(fast());
        s.enqueue(LookupItem::new(
            LookupKind::Flavors,
            "basic",
            Default::default(),
        ));
        assert_eq!(s.queued_len(), 0);
        assert_eq!(s.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_clear_queue() {
        let s = scheduler(fast());
        s.enqueue(LookupItem::offerings("cat-1", "off-1"));
        s.enqueue(LookupItem::offerings("cat-1", "off-2"));

        // The driver has not been polled yet on this single-threaded runtime.
        assert_eq!(s.clear_queue(), 2);
        s.wait_idle().await;
        assert_eq!(s.stats().passes, 0);
    }
}
