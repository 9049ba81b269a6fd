//! Cache key construction.
//!
//! A key is `"{kind prefix}:{id}:{id}..."`. Identifier components are escaped
//! (`%` → `%25`, `:` → `%3A`) so distinct identifier tuples never produce the
//! same key, even when an identifier itself contains a colon.

use crate::error::{Error, Result};
use crate::policy::ResourceKind;
use std::fmt;

/// Deterministic key for one cached value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: ResourceKind,
    key: String,
}

impl CacheKey {
    /// Build a key for any kind, checking the number of identifier components.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` if `ids.len()` does not match the arity of
    /// `kind`.
    pub fn dynamic<S: AsRef<str>>(kind: ResourceKind, ids: &[S]) -> Result<Self> {
        if ids.len() != kind.arity() {
            return Err(Error::InvalidKey(format!(
                "{} expects {} identifier(s), got {}",
                kind,
                kind.arity(),
                ids.len()
            )));
        }
        Ok(Self::build(kind, ids))
    }

    fn build<S: AsRef<str>>(kind: ResourceKind, ids: &[S]) -> Self {
        let mut key = String::from(kind.prefix());
        for id in ids {
            key.push(':');
            escape_into(id.as_ref(), &mut key);
        }
        CacheKey { kind, key }
    }

    pub fn catalog_list() -> Self {
        Self::build::<&str>(ResourceKind::CatalogList, &[])
    }

    pub fn offering_list(catalog_id: &str) -> Self {
        Self::build(ResourceKind::OfferingList, &[catalog_id])
    }

    pub fn offering_details(catalog_id: &str, offering_id: &str) -> Self {
        Self::build(ResourceKind::OfferingDetails, &[catalog_id, offering_id])
    }

    pub fn flavor_list(catalog_id: &str, offering_id: &str) -> Self {
        Self::build(ResourceKind::FlavorList, &[catalog_id, offering_id])
    }

    pub fn flavor_details(catalog_id: &str, offering_id: &str, flavor: &str) -> Self {
        Self::build(ResourceKind::FlavorDetails, &[catalog_id, offering_id, flavor])
    }

    pub fn catalog_validation(catalog_id: &str) -> Self {
        Self::build(ResourceKind::CatalogValidation, &[catalog_id])
    }

    pub fn offering_validation(catalog_id: &str, offering_id: &str) -> Self {
        Self::build(ResourceKind::OfferingValidation, &[catalog_id, offering_id])
    }

    pub fn flavor_validation(catalog_id: &str, offering_id: &str, flavor: &str) -> Self {
        Self::build(ResourceKind::FlavorValidation, &[catalog_id, offering_id, flavor])
    }

    pub fn api_response(path: &str) -> Self {
        Self::build(ResourceKind::ApiResponse, &[path])
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Split a key back into its identifier components.
    pub fn components(&self) -> Vec<String> {
        self.key.split(':').skip(1).map(unescape).collect()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

fn escape_into(id: &str, out: &mut String) {
    for c in id.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
}

fn unescape(part: &str) -> String {
    part.replace("%3A", ":").replace("%25", "%")
}
