//! Catalog resources and the remote client seam.
//!
//! The cache never talks to the network itself. Everything remote goes through
//! a [`CatalogResourceClient`], which owns transport, authentication and
//! pagination. Models only keep the fields the editor needs; unknown fields in
//! API payloads are ignored.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// A private or public catalog.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "shortDescription")]
    pub short_description: Option<String>,
    #[serde(default, alias = "catalogType")]
    pub catalog_type: Option<String>,
}

/// One published version of an offering.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferingVersion {
    pub version: String,
    #[serde(default, alias = "flavorName")]
    pub flavor: Option<String>,
    #[serde(default, alias = "versionLocator")]
    pub version_locator: Option<String>,
}

/// An offering (product) inside a catalog.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Offering {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "catalogId")]
    pub catalog_id: String,
    #[serde(default, alias = "shortDescription")]
    pub short_description: Option<String>,
    #[serde(default)]
    pub versions: Vec<OfferingVersion>,
}

/// A deployable flavor of an offering.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Flavor {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "installType")]
    pub install_type: Option<String>,
}

/// Remote catalog API client.
///
/// One method per fetchable resource kind. Failures should be reported as
/// `Error::Fetch` with a message fit for the user; the prefetch scheduler
/// retries those.
///
/// Returned futures must be `Send` so fetches can run in spawned tasks.
pub trait CatalogResourceClient: Send + Sync + 'static {
    /// All catalogs visible to the account.
    ///
    /// # Errors
    /// Returns `Err` if the remote call fails
    fn list_catalogs(&self) -> impl Future<Output = Result<Vec<Catalog>>> + Send;

    /// Offerings of one catalog.
    ///
    /// # Errors
    /// Returns `Err` if the remote call fails
    fn list_offerings(
        &self,
        catalog_id: &str,
    ) -> impl Future<Output = Result<Vec<Offering>>> + Send;

    /// One offering, with its versions.
    ///
    /// # Errors
    /// Returns `Err` if the remote call fails
    fn get_offering(
        &self,
        catalog_id: &str,
        offering_id: &str,
    ) -> impl Future<Output = Result<Offering>> + Send;

    /// Flavors published for an offering.
    ///
    /// # Errors
    /// Returns `Err` if the remote call fails
    fn list_flavors(
        &self,
        catalog_id: &str,
        offering_id: &str,
    ) -> impl Future<Output = Result<Vec<Flavor>>> + Send;

    /// One flavor of an offering.
    ///
    /// # Errors
    /// Returns `Err` if the remote call fails
    fn get_flavor(
        &self,
        catalog_id: &str,
        offering_id: &str,
        flavor: &str,
    ) -> impl Future<Output = Result<Flavor>> + Send;

    /// Raw API response for a path (optional).
    ///
    /// # Errors
    /// Returns `Err` if not implemented or if the remote call fails
    fn get_json(&self, path: &str) -> impl Future<Output = Result<Value>> + Send {
        let path = path.to_string();
        async move {
            Err(Error::NotImplemented(format!(
                "get_json not implemented for this client ({})",
                path
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offering_accepts_api_casing() {
        let offering: Offering = serde_json::from_value(json!({
            "id": "off-1",
            "name": "vpc",
            "label": "VPC landing zone",
            "catalogId": "cat-1",
            "kinds": [{"format_kind": "terraform"}],
            "versions": [{"version": "1.0.0", "flavorName": "standard"}]
        }))
        .unwrap();

        assert_eq!(offering.catalog_id, "cat-1");
        assert_eq!(offering.versions[0].flavor.as_deref(), Some("standard"));
    }

    #[test]
    fn test_flavor_minimal() {
        let flavor: Flavor = serde_json::from_value(json!({"name": "basic"})).unwrap();
        assert_eq!(flavor.name, "basic");
        assert!(flavor.label.is_empty());
    }
}
