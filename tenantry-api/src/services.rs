//! Composition of the per-request tenant collaborators.
//!
//! [`TenantServices`] is built once at startup as a prototype. Its wiring
//! is checked with [`CompositionRoot::verify`] before anything serves
//! traffic; afterwards each request gets a re-scoped clone via
//! [`TenantServices::for_scope`].

use crate::config::ApiConfig;
use crate::impersonation::{ImpersonatingTransport, Transport};
use std::sync::Arc;
use tenantry_core::{RequestScope, ResourceKind, TenancyResult, TenantIdentity};
use tenantry_storage::{
    AnnotatingWriter, ClientSet, CompositionRoot, Dependency, ObjectStore, Rescope, Scoped,
    SharedCache, TenantIndexer, TenantLister, TENANT_INDEX,
};
use tracing::info;

#[derive(Clone, Debug)]
pub struct TenantServices {
    clients: ClientSet,
    transport: Scoped<ImpersonatingTransport>,
}

impl TenantServices {
    pub const NAME: &'static str = "tenant-services";
    pub const TRANSPORT: &'static str = "transport";

    /// Wire the prototype for one resource kind.
    ///
    /// Installs the tenant indices on `cache` if they are missing and fails
    /// on any composition defect.
    pub fn bootstrap(
        config: &ApiConfig,
        cache: SharedCache,
        store: Arc<dyn ObjectStore>,
        kind: ResourceKind,
        transport: Arc<dyn Transport>,
    ) -> TenancyResult<Self> {
        let installed = cache.stats()?.indexers;
        if !installed.iter().any(|name| name == TENANT_INDEX) {
            TenantIndexer::install(&cache)?;
        }

        let global_admin = config.tenancy.global_admin.clone();
        let lister = Dependency::of(
            TenantLister::new(cache, kind.clone()).with_global_admin(global_admin.clone()),
        );
        let writer = Dependency::of(AnnotatingWriter::new(store, &config.tenancy, kind));
        let transport = Dependency::of(
            ImpersonatingTransport::new(transport, config.auth.admin_user.clone())
                .with_global_admin(global_admin),
        );

        let root = ClientSet::declare(CompositionRoot::new())
            .dependency(Self::TRANSPORT, &transport, &[])
            .collaborator(Self::NAME, true, &[ClientSet::NAME, Self::TRANSPORT]);
        Self::verify(&root)?;

        Ok(Self {
            clients: ClientSet::new(lister, writer)?,
            transport: transport.require(Self::TRANSPORT)?,
        })
    }

    fn verify(root: &CompositionRoot) -> TenancyResult<()> {
        root.verify()?;
        let order = root.rescope_order(Self::NAME)?;
        info!(collaborators = root.len(), order = ?order, "Tenant services composed");
        Ok(())
    }

    /// Clone bound to a resolved request scope.
    ///
    /// The global administrator gets the reserved sentinel binding, which
    /// lists across tenants and never impersonates. An unscoped caller gets
    /// the root itself.
    pub fn for_scope(&self, scope: &RequestScope) -> Self {
        match scope {
            RequestScope::Tenant(tenant) => self.rescope(tenant),
            RequestScope::GlobalAdmin => self.rescope(&TenantIdentity::global_admin()),
            RequestScope::Unscoped => self.clone(),
        }
    }

    pub fn clients(&self) -> &ClientSet {
        &self.clients
    }

    pub fn lister(&self) -> &TenantLister {
        self.clients.lister()
    }

    pub fn writer(&self) -> &AnnotatingWriter {
        self.clients.writer()
    }

    pub fn transport(&self) -> &ImpersonatingTransport {
        &self.transport
    }
}

impl Rescope for TenantServices {
    fn rescope(&self, tenant: &TenantIdentity) -> Self {
        Self {
            clients: self.clients.rescope(tenant),
            transport: self.transport.rescope(tenant),
        }
    }

    fn bound_tenant(&self) -> Option<&TenantIdentity> {
        self.clients.bound_tenant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impersonation::{OutboundRequest, OutboundResponse};
    use async_trait::async_trait;
    use axum::http::{HeaderMap, StatusCode};
    use tenantry_core::{LabelSelector, ObjectMeta, PolicyError, StoredObject, TenancyError};
    use tenantry_storage::InMemoryObjectStore;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _request: OutboundRequest) -> TenancyResult<OutboundResponse> {
            Ok(OutboundResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Vec::new(),
            })
        }
    }

    fn pods() -> ResourceKind {
        ResourceKind::namespaced("", "pods")
    }

    fn t(name: &str) -> TenantIdentity {
        TenantIdentity::new(name, "w1", "c1").expect("valid identity")
    }

    fn services() -> TenancyResult<TenantServices> {
        let cache = SharedCache::new();
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::with_watch(cache.clone()));
        TenantServices::bootstrap(&ApiConfig::default(), cache, store, pods(), Arc::new(NullTransport))
    }

    #[tokio::test]
    async fn test_scoped_clones_are_isolated() -> TenancyResult<()> {
        let root = services()?;
        let t1 = root.for_scope(&RequestScope::Tenant(t("t1")));
        let t2 = root.for_scope(&RequestScope::Tenant(t("t2")));
        t1.writer()
            .create(StoredObject::new(pods(), ObjectMeta::new("foo").with_namespace("ns")))
            .await?;

        assert!(t1.lister().get("ns", "foo").is_ok());
        assert!(t2.lister().get("ns", "foo").unwrap_err().is_not_found());
        assert_eq!(t2.transport().bound_tenant(), Some(&t("t2")));
        assert!(root.bound_tenant().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_lists_everything_but_cannot_point_get() -> TenancyResult<()> {
        let root = services()?;
        for name in ["t1", "t2"] {
            root.rescope(&t(name))
                .writer()
                .create(StoredObject::new(pods(), ObjectMeta::new("foo").with_namespace("ns")))
                .await?;
        }
        let admin = root.for_scope(&RequestScope::GlobalAdmin);
        assert_eq!(admin.lister().list(&LabelSelector::everything())?.len(), 2);
        assert!(matches!(
            admin.lister().get("ns", "foo"),
            Err(TenancyError::Policy(PolicyError::AdminPointOperation { .. }))
        ));
        assert!(admin.transport().bound_tenant().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_configured_admin_rescope_is_global() -> TenancyResult<()> {
        let ops = TenantIdentity::new("system", "ops", "all").expect("valid identity");
        let mut config = ApiConfig::default();
        config.tenancy.global_admin = ops.clone();
        let cache = SharedCache::new();
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::with_watch(cache.clone()));
        let root = TenantServices::bootstrap(&config, cache, store, pods(), Arc::new(NullTransport))?;
        root.rescope(&t("t1"))
            .writer()
            .create(StoredObject::new(pods(), ObjectMeta::new("foo").with_namespace("ns")))
            .await?;

        let admin = root.rescope(&ops);
        assert_eq!(admin.lister().scope(), &RequestScope::GlobalAdmin);
        assert_eq!(admin.writer().scope(), &RequestScope::GlobalAdmin);
        assert_eq!(admin.transport().scope(), &RequestScope::GlobalAdmin);
        assert_eq!(admin.lister().list(&LabelSelector::everything())?.len(), 1);
        assert!(admin.bound_tenant().is_none());
        Ok(())
    }

    #[test]
    fn test_bootstrap_on_preindexed_cache() -> TenancyResult<()> {
        let cache = SharedCache::new();
        TenantIndexer::install(&cache)?;
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        TenantServices::bootstrap(&ApiConfig::default(), cache, store, pods(), Arc::new(NullTransport))?;
        Ok(())
    }
}
