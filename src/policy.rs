//! Resource kinds and their caching policies.
//!
//! Every cached object belongs to one [`ResourceKind`]. Each kind carries a
//! [`Policy`] deciding how long entries stay live and whether they survive a
//! restart through the persistent backend.
//!
//! | Kind | Default TTL | Persistent |
//! |------|-------------|------------|
//! | `CatalogList` | 1h | yes |
//! | `OfferingList` | 1h | no |
//! | `OfferingDetails` | 1h | no |
//! | `FlavorList` | 1h | no |
//! | `FlavorDetails` | 1h | no |
//! | `CatalogValidation` | 24h | yes |
//! | `OfferingValidation` | 24h | yes |
//! | `FlavorValidation` | 24h | no |
//! | `ApiResponse` | 5m | no |
//!
//! [`PolicyTable`] holds a policy for every kind, so a lookup can never fail.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Storage prefix used by the default persistent policies.
pub const DEFAULT_STORAGE_PREFIX: &str = "catalogCache.";

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Class of cacheable remote object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    CatalogList,
    OfferingList,
    OfferingDetails,
    FlavorList,
    FlavorDetails,
    CatalogValidation,
    OfferingValidation,
    FlavorValidation,
    ApiResponse,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::CatalogList,
        ResourceKind::OfferingList,
        ResourceKind::OfferingDetails,
        ResourceKind::FlavorList,
        ResourceKind::FlavorDetails,
        ResourceKind::CatalogValidation,
        ResourceKind::OfferingValidation,
        ResourceKind::FlavorValidation,
        ResourceKind::ApiResponse,
    ];

    /// Key namespace for this kind. First segment of every [`CacheKey`].
    ///
    /// [`CacheKey`]: crate::key::CacheKey
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceKind::CatalogList => "catalogs",
            ResourceKind::OfferingList => "offerings",
            ResourceKind::OfferingDetails => "offeringDetails",
            ResourceKind::FlavorList => "flavors",
            ResourceKind::FlavorDetails => "flavorDetails",
            ResourceKind::CatalogValidation => "catalogValidation",
            ResourceKind::OfferingValidation => "offeringValidation",
            ResourceKind::FlavorValidation => "flavorValidation",
            ResourceKind::ApiResponse => "apiResponse",
        }
    }

    /// Number of identifier components a key of this kind carries.
    pub fn arity(&self) -> usize {
        match self {
            ResourceKind::CatalogList => 0,
            ResourceKind::OfferingList | ResourceKind::CatalogValidation => 1,
            ResourceKind::ApiResponse => 1,
            ResourceKind::OfferingDetails
            | ResourceKind::FlavorList
            | ResourceKind::OfferingValidation => 2,
            ResourceKind::FlavorDetails | ResourceKind::FlavorValidation => 3,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Caching policy for one resource kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Time before an entry is considered stale.
    pub ttl: Duration,
    /// Whether entries are also written to the persistent backend.
    pub persistent: bool,
    /// Namespace prepended to the key in the persistent backend.
    pub storage_prefix: String,
}

impl Policy {
    /// In-process only policy.
    pub fn ephemeral(ttl: Duration) -> Self {
        Policy {
            ttl,
            persistent: false,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
        }
    }

    /// Policy whose entries survive restarts.
    pub fn persistent(ttl: Duration) -> Self {
        Policy {
            ttl,
            persistent: true,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
        }
    }

    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Key under which an entry is stored in the persistent backend.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.storage_prefix, key)
    }

    /// Default policy for a kind.
    pub fn default_for(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::CatalogList => Policy::persistent(HOUR),
            ResourceKind::OfferingList
            | ResourceKind::OfferingDetails
            | ResourceKind::FlavorList
            | ResourceKind::FlavorDetails => Policy::ephemeral(HOUR),
            ResourceKind::CatalogValidation | ResourceKind::OfferingValidation => {
                Policy::persistent(DAY)
            }
            ResourceKind::FlavorValidation => Policy::ephemeral(DAY),
            ResourceKind::ApiResponse => Policy::ephemeral(Duration::from_secs(5 * 60)),
        }
    }
}

/// Partial policy, as found in settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyOverride {
    pub ttl_seconds: Option<u64>,
    pub persistent: Option<bool>,
    pub storage_prefix: Option<String>,
}

/// A policy for every [`ResourceKind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyTable {
    policies: Vec<Policy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        PolicyTable {
            policies: ResourceKind::ALL
                .iter()
                .map(|kind| Policy::default_for(*kind))
                .collect(),
        }
    }

    /// Policy for a kind.
    pub fn get(&self, kind: ResourceKind) -> &Policy {
        &self.policies[kind.index()]
    }

    /// Replace the policy of one kind.
    pub fn with_policy(mut self, kind: ResourceKind, policy: Policy) -> Self {
        self.policies[kind.index()] = policy;
        self
    }

    /// Apply the fields set in `overrides` on top of the current policies.
    pub fn with_overrides(mut self, overrides: &HashMap<ResourceKind, PolicyOverride>) -> Self {
        for (kind, o) in overrides {
            let policy = &mut self.policies[kind.index()];
            if let Some(secs) = o.ttl_seconds {
                policy.ttl = Duration::from_secs(secs);
            }
            if let Some(persistent) = o.persistent {
                policy.persistent = persistent;
            }
            if let Some(prefix) = &o.storage_prefix {
                policy.storage_prefix = prefix.clone();
            }
        }
        self
    }

    /// Every persistent kind with its policy.
    pub fn persistent_kinds(&self) -> impl Iterator<Item = (ResourceKind, &Policy)> + '_ {
        ResourceKind::ALL
            .iter()
            .map(move |kind| (*kind, self.get(*kind)))
            .filter(|(_, policy)| policy.persistent)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}
