//! # catalog-cache
//!
//! Caching and request coordination for a catalog descriptor editor.
//!
//! Editors constantly need remote catalog data (catalogs, offerings, flavors,
//! validation results) while the user types. This crate keeps that data close:
//!
//! - **[`CacheStore`]:** typed TTL cache, optionally persisted through a
//!   [`PersistentBackend`] and rehydrated lazily
//! - **[`RequestCoordinator`]:** at most one in-flight remote call per key
//! - **[`CatalogCache`]:** explicit lookups combining both, per [`FetchStrategy`]
//! - **[`ValidationReader`]:** cache-only validation status for UI rendering
//! - **[`PrefetchScheduler`]:** throttled background warming from the loaded
//!   document
//!
//! ## Quick Start
//!
//! ```ignore
//! use catalog_cache::{CacheLayer, CacheConfig, FetchStrategy, ValidationSubject};
//! use catalog_cache::backend::InMemoryBackend;
//!
//! // 1. Wire everything up (inside a Tokio runtime)
//! let layer = CacheLayer::new(InMemoryBackend::new(), my_client, &CacheConfig::default())?;
//!
//! // 2. Document loaded: warm what it references, in the background
//! layer.prefetch.analyze_and_enqueue(&manifest);
//!
//! // 3. Status icon: cache only, never blocks on the network
//! let ok = layer.validation.is_valid(&ValidationSubject::catalog("cat-1")).await;
//!
//! // 4. Offering picker: cache first, one shared remote call on miss
//! let offerings = layer.cache.offerings("cat-1", FetchStrategy::Refresh).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod layer;
pub mod observability;
pub mod policy;
pub mod prefetch;
pub mod serialization;
pub mod service;
pub mod store;
pub mod strategy;
pub mod validation;

// Re-exports for convenience
pub use backend::PersistentBackend;
pub use catalog::CatalogResourceClient;
pub use config::{CacheConfig, PrefetchConfig};
pub use coordinator::{CoordinateOptions, RequestCoordinator};
pub use error::{Error, Result};
pub use key::CacheKey;
pub use layer::CacheLayer;
pub use policy::{Policy, PolicyTable, ResourceKind};
pub use prefetch::{LookupItem, PrefetchScheduler};
pub use service::CatalogCache;
pub use store::CacheStore;
pub use strategy::FetchStrategy;
pub use validation::{ValidationReader, ValidationSubject};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
