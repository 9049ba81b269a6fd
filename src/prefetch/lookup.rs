//! Lookup items and document analysis.
//!
//! A loaded catalog manifest references other catalog resources through
//! dependency objects:
//!
//! ```json
//! { "catalog_id": "7a4d...", "id": "f2b1...", "name": "vpc", "flavors": ["standard"] }
//! ```
//!
//! [`analyze`] walks the whole document once and turns every such reference
//! into [`LookupItem`]s the scheduler can warm.

use crate::key::CacheKey;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// What a lookup item warms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupKind {
    /// `value` is a catalog id; warms the catalog's offering list.
    Catalog,
    /// `value` is an offering id; warms that offering's details.
    Offerings,
    /// `value` is a flavor name; warms that flavor's details.
    Flavors,
}

impl LookupKind {
    pub fn default_priority(&self) -> u8 {
        match self {
            LookupKind::Catalog => 3,
            LookupKind::Offerings => 2,
            LookupKind::Flavors => 1,
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKind::Catalog => write!(f, "catalog"),
            LookupKind::Offerings => write!(f, "offerings"),
            LookupKind::Flavors => write!(f, "flavors"),
        }
    }
}

/// Owning identifiers of a lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LookupContext {
    pub catalog_id: Option<String>,
    pub offering_id: Option<String>,
    pub is_public: Option<bool>,
}

/// One resource worth warming.
///
/// Two items are the same lookup when kind, value, catalog id and offering id
/// match; `is_public` and `priority` are ignored.
#[derive(Clone, Debug)]
pub struct LookupItem {
    pub kind: LookupKind,
    pub value: String,
    pub context: LookupContext,
    pub priority: u8,
}

impl LookupItem {
    pub fn new(kind: LookupKind, value: impl Into<String>, context: LookupContext) -> Self {
        LookupItem {
            kind,
            value: value.into(),
            context,
            priority: kind.default_priority(),
        }
    }

    pub fn catalog(catalog_id: &str) -> Self {
        Self::new(LookupKind::Catalog, catalog_id, LookupContext::default())
    }

    pub fn offerings(catalog_id: &str, offering_id: &str) -> Self {
        Self::new(
            LookupKind::Offerings,
            offering_id,
            LookupContext {
                catalog_id: Some(catalog_id.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn flavors(catalog_id: &str, offering_id: &str, flavor: &str) -> Self {
        Self::new(
            LookupKind::Flavors,
            flavor,
            LookupContext {
                catalog_id: Some(catalog_id.to_string()),
                offering_id: Some(offering_id.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_public(mut self, is_public: bool) -> Self {
        self.context.is_public = Some(is_public);
        self
    }

    /// Cache entry this item warms, or `None` if the context lacks an id the
    /// kind needs.
    pub fn cache_key(&self) -> Option<CacheKey> {
        match self.kind {
            LookupKind::Catalog => Some(CacheKey::offering_list(&self.value)),
            LookupKind::Offerings => {
                let catalog = self.context.catalog_id.as_deref()?;
                Some(CacheKey::offering_details(catalog, &self.value))
            }
            LookupKind::Flavors => {
                let catalog = self.context.catalog_id.as_deref()?;
                let offering = self.context.offering_id.as_deref()?;
                Some(CacheKey::flavor_details(catalog, offering, &self.value))
            }
        }
    }

    fn identity(&self) -> (LookupKind, &str, Option<&str>, Option<&str>) {
        (
            self.kind,
            &self.value,
            self.context.catalog_id.as_deref(),
            self.context.offering_id.as_deref(),
        )
    }
}

impl PartialEq for LookupItem {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for LookupItem {}

impl Hash for LookupItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for LookupItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.value)?;
        match (&self.context.catalog_id, &self.context.offering_id) {
            (Some(c), Some(o)) => write!(f, " ({}/{})", c, o),
            (Some(c), None) => write!(f, " ({})", c),
            _ => Ok(()),
        }
    }
}

/// Every distinct lookup referenced by `document`, in document order.
pub fn analyze(document: &Value) -> Vec<LookupItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    walk(document, &mut seen, &mut items);
    items
}

fn walk(value: &Value, seen: &mut HashSet<LookupItem>, items: &mut Vec<LookupItem>) {
    match value {
        Value::Object(map) => {
            collect_reference(map, seen, items);
            for child in map.values() {
                walk(child, seen, items);
            }
        }
        Value::Array(values) => {
            for child in values {
                walk(child, seen, items);
            }
        }
        _ => {}
    }
}

fn collect_reference(
    map: &Map<String, Value>,
    seen: &mut HashSet<LookupItem>,
    items: &mut Vec<LookupItem>,
) {
    let Some(catalog_id) = non_empty_str(map, &["catalog_id", "catalogId"]) else {
        return;
    };
    let is_public = map.get("is_public").and_then(Value::as_bool);

    let mut push = |mut item: LookupItem| {
        item.context.is_public = is_public;
        if seen.insert(item.clone()) {
            items.push(item);
        }
    };

    push(LookupItem::catalog(catalog_id));

    let Some(offering_id) = non_empty_str(map, &["id", "offering_id", "offeringId"]) else {
        return;
    };
    push(LookupItem::offerings(catalog_id, offering_id));

    if let Some(Value::Array(flavors)) = map.get("flavors") {
        for flavor in flavors.iter().filter_map(Value::as_str) {
            if !flavor.is_empty() {
                push(LookupItem::flavors(catalog_id, offering_id, flavor));
            }
        }
    }
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| map.get(*name).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}
