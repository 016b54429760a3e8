//! Tenantry Test Utilities
//!
//! Shared test infrastructure for the tenantry workspace:
//! - Proptest generators for identities and stored objects
//! - Fixtures for populated caches
//! - Assertions for the tenancy failure taxonomy

pub use tenantry_core::{
    ObjectMeta, RequestScope, ResourceKind, StoredObject, TenancyError, TenancyResult,
    TenantIdentity,
};
pub use tenantry_storage::{SharedCache, TenantIndexer};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tenancy types.

    use super::*;
    use proptest::prelude::*;

    /// A single valid tenant field value.
    pub fn arb_field() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9-]{0,11}"
    }

    pub fn arb_tenant_identity() -> impl Strategy<Value = TenantIdentity> {
        (arb_field(), arb_field(), arb_field()).prop_map(|(t, w, c)| {
            TenantIdentity::new(t, w, c).expect("generated fields are valid")
        })
    }

    /// Two identities that differ in at least one field.
    pub fn arb_distinct_tenants() -> impl Strategy<Value = (TenantIdentity, TenantIdentity)> {
        (arb_tenant_identity(), arb_tenant_identity()).prop_filter("tenants must differ", |(a, b)| a != b)
    }

    pub fn arb_namespace() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,9}"
    }

    pub fn arb_labels() -> impl Strategy<Value = std::collections::BTreeMap<String, String>> {
        proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..4)
    }

    /// A namespaced object of `kind` owned by `tenant`.
    pub fn arb_object_for(
        kind: ResourceKind,
        tenant: TenantIdentity,
    ) -> impl Strategy<Value = StoredObject> {
        ("[a-z][a-z0-9-]{0,11}", arb_namespace(), arb_labels()).prop_map(
            move |(name, namespace, labels)| {
                let mut meta = ObjectMeta::new(name)
                    .with_namespace(namespace)
                    .with_tenant(&tenant);
                meta.labels = labels;
                StoredObject::new(kind.clone(), meta)
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made objects and caches.

    use super::*;

    pub fn configmaps() -> ResourceKind {
        ResourceKind::namespaced("", "configmaps")
    }

    pub fn tenant(t: &str, w: &str, c: &str) -> TenantIdentity {
        TenantIdentity::new(t, w, c).expect("fixture identity is valid")
    }

    /// Object `name` in `namespace`, annotated for `owner` when given.
    pub fn object_in(
        kind: &ResourceKind,
        owner: Option<&TenantIdentity>,
        namespace: &str,
        name: &str,
    ) -> StoredObject {
        let mut meta = ObjectMeta::new(name).with_namespace(namespace);
        if let Some(owner) = owner {
            meta = meta.with_tenant(owner);
        }
        StoredObject::new(kind.clone(), meta).with_spec(serde_json::json!({ "owner": owner.map(|t| t.to_string()) }))
    }

    /// A cache with the tenant indices installed holding `objects`.
    pub fn populated_cache(objects: Vec<StoredObject>) -> TenancyResult<SharedCache> {
        let cache = SharedCache::new();
        TenantIndexer::install(&cache)?;
        for obj in objects {
            cache.upsert(obj)?;
        }
        Ok(cache)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the failure taxonomy.

    use super::*;

    pub fn assert_scope_violation<T: std::fmt::Debug>(result: &TenancyResult<T>) {
        assert!(
            matches!(result, Err(TenancyError::Scope(_))),
            "expected scope violation, got {:?}",
            result
        );
    }

    pub fn assert_policy_rejection<T: std::fmt::Debug>(result: &TenancyResult<T>) {
        assert!(
            matches!(result, Err(TenancyError::Policy(_))),
            "expected policy rejection, got {:?}",
            result
        );
    }

    pub fn assert_decode_failure<T: std::fmt::Debug>(result: &TenancyResult<T>) {
        assert!(
            matches!(result, Err(TenancyError::Decode(_))),
            "expected decode failure, got {:?}",
            result
        );
    }

    pub fn assert_not_found<T: std::fmt::Debug>(result: &TenancyResult<T>) {
        assert!(
            matches!(result, Err(e) if e.is_not_found()),
            "expected not found, got {:?}",
            result
        );
    }
}
