//! Metrics hooks for cache operations.
//!
//! Implement [`CacheMetrics`] to forward cache statistics to your monitoring
//! system and pass it to [`CacheStore::with_metrics`]:
//!
//! ```ignore
//! use catalog_cache::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct StatusBarMetrics;
//!
//! impl CacheMetrics for StatusBarMetrics {
//!     fn record_hit(&self, _key: &str, _duration: Duration) {
//!         // counter!("catalog_cache_hits").inc();
//!     }
//! }
//!
//! // let store = CacheStore::new(backend, PolicyTable::default())
//! //     .with_metrics(Box::new(StatusBarMetrics));
//! ```
//!
//! Default behavior uses [`NoOpMetrics`]. The trait's own default bodies log
//! through the `log` crate.
//!
//! [`CacheStore::with_metrics`]: crate::store::CacheStore::with_metrics

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit (live entry found).
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a cache miss (absent or expired).
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a cache set operation.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record a cache delete operation.
    fn record_delete(&self, key: &str, duration: Duration) {
        debug!("Cache DELETE: {} took {:?}", key, duration);
    }

    /// Record a swallowed error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _key: &str, _duration: Duration) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Metrics implementation that keeps running totals.
#[derive(Default)]
pub struct CountingMetrics {
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    sets: std::sync::atomic::AtomicU64,
    errors: std::sync::atomic::AtomicU64,
}

/// Snapshot of [`CountingMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
}

impl CountingMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        MetricsSnapshot {
            hits: self.hits.load(Relaxed),
            misses: self.misses.load(Relaxed),
            sets: self.sets.load(Relaxed),
            errors: self.errors.load(Relaxed),
        }
    }
}

impl CacheMetrics for CountingMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {
        self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn record_miss(&self, _key: &str, _duration: Duration) {
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn record_set(&self, _key: &str, _duration: Duration) {
        self.sets.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn record_delete(&self, _key: &str, _duration: Duration) {}

    fn record_error(&self, key: &str, error: &str) {
        self.errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

impl<M: CacheMetrics + ?Sized> CacheMetrics for std::sync::Arc<M> {
    fn record_hit(&self, key: &str, duration: Duration) {
        (**self).record_hit(key, duration)
    }

    fn record_miss(&self, key: &str, duration: Duration) {
        (**self).record_miss(key, duration)
    }

    fn record_set(&self, key: &str, duration: Duration) {
        (**self).record_set(key, duration)
    }

    fn record_delete(&self, key: &str, duration: Duration) {
        (**self).record_delete(key, duration)
    }

    fn record_error(&self, key: &str, error: &str) {
        (**self).record_error(key, error)
    }
}
