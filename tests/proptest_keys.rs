//! Property-based tests for cache key construction.
//!
//! # Properties Tested
//!
//! 1. **Injectivity**: distinct identifier tuples never share a key
//! 2. **Reversibility**: `components()` returns the identifiers a key was built from
//! 3. **Namespacing**: keys of different kinds never collide

use catalog_cache::policy::ResourceKind;
use catalog_cache::CacheKey;
use proptest::prelude::*;

/// Identifiers biased towards the characters the escaping cares about.
fn arb_id() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        "[a-z0-9:%-]{0,12}",
        Just("%3A".to_string()),
        Just(":".to_string()),
    ]
}

fn arb_triple() -> impl Strategy<Value = [String; 3]> {
    (arb_id(), arb_id(), arb_id()).prop_map(|(a, b, c)| [a, b, c])
}

fn arb_kind() -> impl Strategy<Value = ResourceKind> {
    prop::sample::select(ResourceKind::ALL.to_vec())
}

proptest! {
    /// Property: equal keys imply equal identifier tuples
    #[test]
    fn prop_keys_injective(a in arb_triple(), b in arb_triple()) {
        let key_a = CacheKey::dynamic(ResourceKind::FlavorDetails, &a)
            .expect("Arity matches");
        let key_b = CacheKey::dynamic(ResourceKind::FlavorDetails, &b)
            .expect("Arity matches");

        prop_assert_eq!(key_a == key_b, a == b);
    }

    /// Property: components() undoes the escaping
    #[test]
    fn prop_components_roundtrip(ids in arb_triple()) {
        let key = CacheKey::flavor_details(&ids[0], &ids[1], &ids[2]);
        prop_assert_eq!(key.components(), ids.to_vec());
    }

    /// Property: keys of different kinds differ even with the same identifiers
    #[test]
    fn prop_kinds_namespaced(a in arb_kind(), b in arb_kind(), ids in arb_triple()) {
        prop_assume!(a != b);
        let key_a = CacheKey::dynamic(a, &ids[..a.arity()]).expect("Arity matches");
        let key_b = CacheKey::dynamic(b, &ids[..b.arity()]).expect("Arity matches");

        prop_assert_ne!(key_a.as_str(), key_b.as_str());
    }

    /// Property: wrong arity is always rejected
    #[test]
    fn prop_wrong_arity_rejected(kind in arb_kind(), ids in prop::collection::vec(arb_id(), 0..5)) {
        prop_assume!(ids.len() != kind.arity());
        prop_assert!(CacheKey::dynamic(kind, &ids[..]).is_err());
    }
}
