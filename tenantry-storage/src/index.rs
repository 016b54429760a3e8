//! Secondary index engine: tenant-scoped reads over the shared cache.
//!
//! Two index functions are installed on the cache, `by-tenant` keyed by the
//! joint tenant string and `by-tenant-namespace` keyed by
//! `tenant/workspace/cluster/namespace`. Listers read through them without
//! copying cache entries.
//!
//! A missing tenant is never read as "all tenants": namespaced reads and
//! point lookups without a tenant fail with a scope violation. When an index
//! is missing or degraded the lister falls back to a linear scan, counts it
//! and logs a warning.

use crate::cache::{IndexFunc, SharedCache};
use crate::rescope::Rescope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tenantry_core::{
    gate, LabelSelector, PolicyError, RequestScope, ResourceKind, StorageError, StoredObject,
    TenancyError, TenancyResult, TenantIdentity,
};
use tracing::{trace, warn};

pub const TENANT_INDEX: &str = "by-tenant";
pub const TENANT_NAMESPACE_INDEX: &str = "by-tenant-namespace";

static FALLBACK_SCANS: AtomicU64 = AtomicU64::new(0);

/// Linear scans performed because an index lookup failed, process-wide.
pub fn fallback_scan_count() -> u64 {
    FALLBACK_SCANS.load(Ordering::Relaxed)
}

/// Index value for the tenant index.
pub fn tenant_index_value(tenant: &TenantIdentity) -> String {
    tenant.to_joint_string()
}

/// Index value for the tenant+namespace index.
pub fn tenant_namespace_index_value(tenant: &TenantIdentity, namespace: &str) -> String {
    format!("{}/{}", tenant.to_joint_string(), namespace)
}

/// Objects without tenant annotations produce no values; partial
/// annotations are a decode error.
pub fn tenant_index_func(obj: &StoredObject) -> TenancyResult<Vec<String>> {
    Ok(obj
        .tenant()?
        .map(|t| tenant_index_value(&t))
        .into_iter()
        .collect())
}

/// Only namespaced objects of a tenant produce a value.
pub fn tenant_namespace_index_func(obj: &StoredObject) -> TenancyResult<Vec<String>> {
    let Some(tenant) = obj.tenant()? else {
        return Ok(Vec::new());
    };
    Ok(match obj.namespace() {
        Some(ns) if !ns.is_empty() => vec![tenant_namespace_index_value(&tenant, ns)],
        _ => Vec::new(),
    })
}

/// Installs the tenant index functions on a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantIndexer;

impl TenantIndexer {
    pub fn install(cache: &SharedCache) -> TenancyResult<()> {
        let by_tenant: IndexFunc = Arc::new(tenant_index_func);
        let by_tenant_namespace: IndexFunc = Arc::new(tenant_namespace_index_func);
        cache.add_indexer(TENANT_INDEX, by_tenant)?;
        cache.add_indexer(TENANT_NAMESPACE_INDEX, by_tenant_namespace)?;
        Ok(())
    }
}

type Filter = Arc<dyn Fn(&StoredObject) -> bool + Send + Sync>;

fn build_filter(kind: &ResourceKind, scope: &RequestScope) -> Filter {
    let kind = kind.clone();
    match scope.tenant().cloned() {
        Some(tenant) => Arc::new(move |obj: &StoredObject| {
            obj.kind == kind && matches!(obj.tenant(), Ok(Some(ref owner)) if *owner == tenant)
        }),
        None => Arc::new(move |obj: &StoredObject| obj.kind == kind),
    }
}

/// Tenant-scoped reader over one resource kind in the shared cache.
///
/// The root instance is unscoped; [`Rescope::rescope`] produces a
/// tenant-bound clone that shares the same cache. Re-scoping to the
/// configured administrator identity yields [`RequestScope::GlobalAdmin`].
#[derive(Clone)]
pub struct TenantLister {
    cache: SharedCache,
    kind: ResourceKind,
    scope: RequestScope,
    filter: Filter,
    global_admin: TenantIdentity,
}

impl std::fmt::Debug for TenantLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantLister")
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TenantLister {
    pub fn new(cache: SharedCache, kind: ResourceKind) -> Self {
        Self::with_scope(cache, kind, RequestScope::Unscoped)
    }

    pub fn with_scope(cache: SharedCache, kind: ResourceKind, scope: RequestScope) -> Self {
        let filter = build_filter(&kind, &scope);
        Self {
            cache,
            kind,
            scope,
            filter,
            global_admin: TenantIdentity::global_admin(),
        }
    }

    /// Treat `identity` as the global administrator when re-scoping.
    pub fn with_global_admin(mut self, identity: TenantIdentity) -> Self {
        self.global_admin = identity;
        self
    }

    /// Bind to an already resolved scope, e.g. the global administrator.
    pub fn for_scope(&self, scope: RequestScope) -> Self {
        Self {
            filter: build_filter(&self.kind, &scope),
            cache: self.cache.clone(),
            kind: self.kind.clone(),
            scope,
            global_admin: self.global_admin.clone(),
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    pub fn fallback_scans(&self) -> u64 {
        fallback_scan_count()
    }

    /// Every object owned by the bound tenant.
    pub fn by_tenant(&self) -> TenancyResult<Vec<Arc<StoredObject>>> {
        let tenant = gate::require_tenant(&self.scope, "list by tenant")?;
        self.indexed(TENANT_INDEX, &tenant_index_value(tenant))
    }

    /// Every object owned by the bound tenant in `namespace`.
    pub fn by_tenant_namespace(&self, namespace: &str) -> TenancyResult<Vec<Arc<StoredObject>>> {
        let tenant = gate::require_tenant(&self.scope, "list by tenant and namespace")?;
        let value = tenant_namespace_index_value(tenant, namespace);
        Ok(self
            .indexed(TENANT_NAMESPACE_INDEX, &value)?
            .into_iter()
            .filter(|o| o.namespace() == Some(namespace))
            .collect())
    }

    /// Objects visible to the scope matching `selector`, across namespaces.
    ///
    /// Global scopes get an unfiltered linear scan with label matching only.
    pub fn list(&self, selector: &LabelSelector) -> TenancyResult<Vec<Arc<StoredObject>>> {
        let candidates = match &self.scope {
            RequestScope::Tenant(_) => self.by_tenant()?,
            RequestScope::GlobalAdmin | RequestScope::Unscoped => self.scan()?,
        };
        Ok(candidates
            .into_iter()
            .filter(|o| selector.matches(&o.meta.labels))
            .collect())
    }

    /// Namespaced point lookup. Fails closed without a tenant.
    pub fn get(&self, namespace: &str, name: &str) -> TenancyResult<Arc<StoredObject>> {
        self.refuse_admin_point("get")?;
        let tenant = gate::require_tenant(&self.scope, "get")?;
        trace!(tenant = %tenant, namespace, name, "Point lookup");
        self.by_tenant_namespace(namespace)?
            .into_iter()
            .find(|o| o.name() == name)
            .ok_or_else(|| not_found(tenant, Some(namespace), name))
    }

    /// Cluster-scoped point lookup. Fails closed without a tenant.
    pub fn get_cluster(&self, name: &str) -> TenancyResult<Arc<StoredObject>> {
        self.refuse_admin_point("get")?;
        let tenant = gate::require_tenant(&self.scope, "get")?;
        self.by_tenant()?
            .into_iter()
            .find(|o| o.namespace().map_or(true, str::is_empty) && o.name() == name)
            .ok_or_else(|| not_found(tenant, None, name))
    }

    /// Reader restricted to one namespace.
    pub fn namespace(&self, namespace: impl Into<String>) -> NamespaceLister {
        NamespaceLister {
            parent: self.clone(),
            namespace: namespace.into(),
        }
    }

    fn refuse_admin_point(&self, operation: &str) -> TenancyResult<()> {
        if matches!(self.scope, RequestScope::GlobalAdmin) {
            return Err(PolicyError::AdminPointOperation {
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn indexed(&self, index: &str, value: &str) -> TenancyResult<Vec<Arc<StoredObject>>> {
        match self.cache.by_index(index, value) {
            Ok(objs) => Ok(objs.into_iter().filter(|o| o.kind == self.kind).collect()),
            Err(TenancyError::Storage(
                e @ (StorageError::IndexNotFound { .. } | StorageError::IndexFailed { .. }),
            )) => {
                FALLBACK_SCANS.fetch_add(1, Ordering::Relaxed);
                warn!(index, error = %e, kind = %self.kind, "Index lookup failed; falling back to linear scan");
                self.scan()
            }
            Err(e) => Err(e),
        }
    }

    fn scan(&self) -> TenancyResult<Vec<Arc<StoredObject>>> {
        Ok(self
            .cache
            .list()?
            .into_iter()
            .filter(|o| (self.filter)(o))
            .collect())
    }
}

impl Rescope for TenantLister {
    fn rescope(&self, tenant: &TenantIdentity) -> Self {
        self.for_scope(RequestScope::resolve(Some(tenant.clone()), &self.global_admin))
    }

    fn bound_tenant(&self) -> Option<&TenantIdentity> {
        self.scope.tenant()
    }
}

fn not_found(tenant: &TenantIdentity, namespace: Option<&str>, name: &str) -> TenancyError {
    let key = match namespace {
        Some(ns) => format!("{}/{}/{}", tenant, ns, name),
        None => format!("{}/{}", tenant, name),
    };
    StorageError::NotFound { key }.into()
}

/// Namespace-restricted view of a [`TenantLister`].
#[derive(Debug, Clone)]
pub struct NamespaceLister {
    parent: TenantLister,
    namespace: String,
}

impl NamespaceLister {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Objects in this namespace matching `selector`.
    ///
    /// The global administrator scans every tenant's objects in the
    /// namespace; an unscoped caller is refused.
    pub fn list(&self, selector: &LabelSelector) -> TenancyResult<Vec<Arc<StoredObject>>> {
        let candidates = match &self.parent.scope {
            RequestScope::Tenant(_) => self.parent.by_tenant_namespace(&self.namespace)?,
            RequestScope::GlobalAdmin => self
                .parent
                .scan()?
                .into_iter()
                .filter(|o| o.namespace() == Some(self.namespace.as_str()))
                .collect(),
            RequestScope::Unscoped => {
                gate::require_tenant(&self.parent.scope, "list namespaced objects")?;
                Vec::new()
            }
        };
        Ok(candidates
            .into_iter()
            .filter(|o| selector.matches(&o.meta.labels))
            .collect())
    }

    pub fn get(&self, name: &str) -> TenancyResult<Arc<StoredObject>> {
        self.parent.get(&self.namespace, name)
    }
}

impl Rescope for NamespaceLister {
    fn rescope(&self, tenant: &TenantIdentity) -> Self {
        Self {
            parent: self.parent.rescope(tenant),
            namespace: self.namespace.clone(),
        }
    }

    fn bound_tenant(&self) -> Option<&TenantIdentity> {
        self.parent.bound_tenant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::{ObjectMeta, ScopeError, TENANT_ANNOTATION};

    fn tenant(t: &str) -> TenantIdentity {
        TenantIdentity::new(t, "w1", "c1").expect("valid identity")
    }

    fn configmaps() -> ResourceKind {
        ResourceKind::namespaced("", "configmaps")
    }

    fn object(t: &str, ns: &str, name: &str) -> StoredObject {
        StoredObject::new(
            configmaps(),
            ObjectMeta::new(name)
                .with_namespace(ns)
                .with_label("app", "web")
                .with_tenant(&tenant(t)),
        )
    }

    fn populated() -> TenancyResult<SharedCache> {
        let cache = SharedCache::new();
        TenantIndexer::install(&cache)?;
        cache.upsert(object("t1", "ns", "foo"))?;
        cache.upsert(object("t1", "other", "bar"))?;
        cache.upsert(object("t2", "ns", "foo"))?;
        cache.upsert(StoredObject::new(configmaps(), ObjectMeta::new("sys").with_namespace("ns")))?;
        Ok(cache)
    }

    #[test]
    fn test_by_tenant_namespace_get() -> TenancyResult<()> {
        let root = TenantLister::new(populated()?, configmaps());
        let t1 = root.rescope(&tenant("t1"));
        let found = t1.namespace("ns").get("foo")?;
        assert_eq!(found.tenant()?, Some(tenant("t1")));

        let t3 = root.rescope(&tenant("t3"));
        let err = t3.namespace("ns").get("foo").unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn test_isolation() -> TenancyResult<()> {
        let root = TenantLister::new(populated()?, configmaps());
        let t2 = root.rescope(&tenant("t2"));
        let visible = t2.by_tenant()?;
        assert_eq!(visible.len(), 1);
        assert!(visible.iter().all(|o| matches!(o.tenant(), Ok(Some(ref t)) if *t == tenant("t2"))));
        Ok(())
    }

    #[test]
    fn test_unscoped_get_fails_closed() -> TenancyResult<()> {
        let root = TenantLister::new(populated()?, configmaps());
        let err = root.get("ns", "foo").unwrap_err();
        assert!(matches!(err, TenancyError::Scope(ScopeError::MissingTenant { .. })));
        let err = root.namespace("ns").list(&LabelSelector::everything()).unwrap_err();
        assert!(matches!(err, TenancyError::Scope(ScopeError::MissingTenant { .. })));
        assert!(root.by_tenant().is_err());
        Ok(())
    }

    #[test]
    fn test_admin_lists_everything_but_cannot_get() -> TenancyResult<()> {
        let root = TenantLister::new(populated()?, configmaps());
        let admin = root.for_scope(RequestScope::GlobalAdmin);
        assert_eq!(admin.list(&LabelSelector::everything())?.len(), 4);
        assert_eq!(admin.namespace("ns").list(&LabelSelector::everything())?.len(), 3);
        let err = admin.get("ns", "foo").unwrap_err();
        assert!(matches!(err, TenancyError::Policy(PolicyError::AdminPointOperation { .. })));
        Ok(())
    }

    #[test]
    fn test_list_with_selector() -> TenancyResult<()> {
        let cache = populated()?;
        cache.upsert(StoredObject::new(
            configmaps(),
            ObjectMeta::new("db")
                .with_namespace("ns")
                .with_label("app", "db")
                .with_tenant(&tenant("t1")),
        ))?;
        let t1 = TenantLister::new(cache, configmaps()).rescope(&tenant("t1"));
        let selector = LabelSelector::parse("app=web")?;
        assert_eq!(t1.list(&selector)?.len(), 2);
        assert_eq!(t1.namespace("ns").list(&selector)?.len(), 1);
        assert_eq!(t1.list(&LabelSelector::everything())?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_fallback_without_index() -> TenancyResult<()> {
        let cache = SharedCache::new();
        cache.upsert(object("t1", "ns", "foo"))?;
        cache.upsert(object("t2", "ns", "foo"))?;
        let before = fallback_scan_count();
        let t1 = TenantLister::new(cache, configmaps()).rescope(&tenant("t1"));
        let found = t1.get("ns", "foo")?;
        assert_eq!(found.tenant()?, Some(tenant("t1")));
        assert!(t1.fallback_scans() > before);
        Ok(())
    }

    #[test]
    fn test_partial_annotations_degrade_index_but_stay_hidden() -> TenancyResult<()> {
        let cache = populated()?;
        let mut broken = ObjectMeta::new("broken").with_namespace("ns");
        broken.annotations.insert(TENANT_ANNOTATION.to_string(), "t1".to_string());
        cache.upsert(StoredObject::new(configmaps(), broken))?;

        assert_eq!(
            cache.stats()?.degraded,
            vec![TENANT_INDEX.to_string(), TENANT_NAMESPACE_INDEX.to_string()]
        );

        let before = fallback_scan_count();
        let t1 = TenantLister::new(cache.clone(), configmaps()).rescope(&tenant("t1"));
        let names: Vec<String> = t1.by_tenant()?.iter().map(|o| o.name().to_string()).collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"broken".to_string()));
        assert!(t1.fallback_scans() > before);

        assert!(cache.delete("configmaps//t1///ns/broken")?.is_some());
        assert!(cache.stats()?.degraded.is_empty());
        assert_eq!(t1.by_tenant()?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_kinds_sharing_a_cache() -> TenancyResult<()> {
        let secrets = ResourceKind::namespaced("", "secrets");
        let cache = SharedCache::new();
        TenantIndexer::install(&cache)?;
        cache.upsert(object("t1", "ns", "foo"))?;
        cache.upsert(StoredObject::new(
            secrets.clone(),
            ObjectMeta::new("foo").with_namespace("ns").with_tenant(&tenant("t1")),
        ))?;
        assert_eq!(cache.len()?, 2);

        let configmap = TenantLister::new(cache.clone(), configmaps())
            .rescope(&tenant("t1"))
            .get("ns", "foo")?;
        assert_eq!(configmap.kind, configmaps());
        let secret = TenantLister::new(cache, secrets.clone()).rescope(&tenant("t1")).get("ns", "foo")?;
        assert_eq!(secret.kind, secrets);
        Ok(())
    }

    #[test]
    fn test_rescope_to_configured_admin() -> TenancyResult<()> {
        let ops = TenantIdentity::new("system", "ops", "all").expect("valid identity");
        let root = TenantLister::new(populated()?, configmaps()).with_global_admin(ops.clone());
        let admin = root.rescope(&ops);
        assert_eq!(admin.scope(), &RequestScope::GlobalAdmin);
        assert_eq!(admin.list(&LabelSelector::everything())?.len(), 4);
        assert!(matches!(
            admin.get("ns", "foo"),
            Err(TenancyError::Policy(PolicyError::AdminPointOperation { .. }))
        ));

        let plain = TenantLister::new(populated()?, configmaps()).rescope(&ops);
        assert_eq!(plain.scope(), &RequestScope::Tenant(ops));
        Ok(())
    }

    #[test]
    fn test_rescope_is_idempotent_and_leaves_root() -> TenancyResult<()> {
        let root = TenantLister::new(populated()?, configmaps());
        let once = root.rescope(&tenant("t1"));
        let twice = once.rescope(&tenant("t1"));
        assert_eq!(once.by_tenant()?.len(), twice.by_tenant()?.len());
        assert_eq!(twice.bound_tenant(), Some(&tenant("t1")));
        assert!(root.bound_tenant().is_none());
        Ok(())
    }

    #[test]
    fn test_cluster_scoped_get() -> TenancyResult<()> {
        let namespaces = ResourceKind::cluster_scoped("", "namespaces");
        let cache = SharedCache::new();
        TenantIndexer::install(&cache)?;
        cache.upsert(StoredObject::new(
            namespaces.clone(),
            ObjectMeta::new("ns").with_tenant(&tenant("t1")),
        ))?;
        let lister = TenantLister::new(cache, namespaces);
        assert!(lister.rescope(&tenant("t1")).get_cluster("ns").is_ok());
        let err = lister.rescope(&tenant("t2")).get_cluster("ns").unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }
}
