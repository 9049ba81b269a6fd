//! Fetch strategies for explicit catalog lookups.
//!
//! Every typed operation on [`CatalogCache`] takes a [`FetchStrategy`]:
//!
//! | Strategy | Cache Hit | Cache Miss | Use Case |
//! |----------|-----------|-----------|----------|
//! | **Fresh** | Return | Return None | Rendering; never touch the network |
//! | **Refresh** | Return | Coordinated fetch | Default; pickers and completions |
//! | **Invalidate** | Delete, fetch | Coordinated fetch | "Reload" commands |
//! | **Bypass** | Ignore, fetch | Coordinated fetch | Diagnostics; still repopulates |
//!
//! [`CatalogCache`]: crate::service::CatalogCache

use serde::Deserialize;

/// How an explicit lookup uses the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    /// Cache only. A miss returns `None` without any remote call.
    Fresh,

    /// Cache first, coordinated fetch on miss, result stored.
    #[default]
    Refresh,

    /// Drop the cached entry and any registered in-flight fetch, then fetch.
    Invalidate,

    /// Fetch regardless of the cache, still storing the result for others.
    Bypass,
}

impl FetchStrategy {
    /// Whether a live cached value may be returned.
    pub fn reads_cache(&self) -> bool {
        matches!(self, FetchStrategy::Fresh | FetchStrategy::Refresh)
    }

    /// Whether a miss may trigger a remote call.
    pub fn may_fetch(&self) -> bool {
        !matches!(self, FetchStrategy::Fresh)
    }
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::Fresh => write!(f, "Fresh"),
            FetchStrategy::Refresh => write!(f, "Refresh"),
            FetchStrategy::Invalidate => write!(f, "Invalidate"),
            FetchStrategy::Bypass => write!(f, "Bypass"),
        }
    }
}
