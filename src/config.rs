//! Settings for the cache layer.
//!
//! Everything has a usable default. Editors usually hand over a JSON blob
//! from their settings file:
//!
//! ```
//! use catalog_cache::config::CacheConfig;
//! use catalog_cache::policy::ResourceKind;
//!
//! let config = CacheConfig::from_json_str(r#"{
//!     "policies": { "offeringList": { "ttlSeconds": 600 } },
//!     "prefetch": { "maxConcurrency": 5, "maxItemsPerType": { "offerings": 10 } }
//! }"#).unwrap();
//!
//! let table = config.policy_table();
//! assert_eq!(table.get(ResourceKind::OfferingList).ttl.as_secs(), 600);
//! assert_eq!(config.prefetch.max_concurrency, 5);
//! assert_eq!(config.prefetch.max_items_per_type.offerings, 10);
//! assert_eq!(config.prefetch.max_items_per_type.flavors, 100);
//! ```

use crate::error::{Error, Result};
use crate::policy::{PolicyOverride, PolicyTable, ResourceKind};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Per-kind cap on items processed in one prefetch pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MaxItemsPerType {
    pub catalogs: usize,
    pub offerings: usize,
    pub flavors: usize,
}

impl Default for MaxItemsPerType {
    fn default() -> Self {
        MaxItemsPerType {
            catalogs: 20,
            offerings: 50,
            flavors: 100,
        }
    }
}

/// Background prefetch tuning.
///
/// The timings are not load-bearing for correctness; they only spread load
/// on the remote API.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrefetchConfig {
    /// Items fetched at the same time within a pass.
    pub max_concurrency: usize,
    /// Pause before each item's fetch.
    pub item_delay_ms: u64,
    /// Minimum spacing between the start of two passes.
    pub throttle_interval_ms: u64,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Base backoff, doubled on every retry.
    pub retry_backoff_ms: u64,
    pub max_items_per_type: MaxItemsPerType,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig {
            max_concurrency: 3,
            item_delay_ms: 100,
            throttle_interval_ms: 1000,
            max_retries: 2,
            retry_backoff_ms: 200,
            max_items_per_type: MaxItemsPerType::default(),
        }
    }
}

impl PrefetchConfig {
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_throttle_interval(mut self, interval: Duration) -> Self {
        self.throttle_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_max_items_per_type(mut self, caps: MaxItemsPerType) -> Self {
        self.max_items_per_type = caps;
        self
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Reject settings the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` when `max_concurrency` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::ConfigError(
                "prefetch maxConcurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per-kind policy overrides, keyed by camelCase kind name.
    pub policies: HashMap<ResourceKind, PolicyOverride>,
    pub prefetch: PrefetchConfig,
}

impl CacheConfig {
    /// Parse settings JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` if the JSON is malformed, names an unknown
    /// kind, or fails [`PrefetchConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid cache settings: {}", e)))?;
        config.prefetch.validate()?;
        Ok(config)
    }

    /// Default policies with the configured overrides applied.
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::new().with_overrides(&self.policies)
    }
}
