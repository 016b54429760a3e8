//! Mutation path: tenant-stamping writer and the client-set composite.

use crate::index::TenantLister;
use crate::key::KeyBuilder;
use crate::rescope::{CompositionRoot, Dependency, Rescope, Scoped};
use crate::store::ObjectStore;
use std::sync::Arc;
use tenantry_core::{
    gate, RequestScope, ResourceKind, StorageError, StoredObject, TenancyConfig, TenancyResult,
    TenantIdentity, ValidationError,
};
use tracing::{debug, info};

/// Writes objects of one kind on behalf of a tenant.
///
/// Keys are always built in strict mode, so the root instance and the
/// global administrator cannot write. Reserved annotations are stamped on
/// create and restored on update.
#[derive(Clone)]
pub struct AnnotatingWriter {
    store: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
    kind: ResourceKind,
    scope: RequestScope,
    global_admin: TenantIdentity,
}

impl std::fmt::Debug for AnnotatingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotatingWriter")
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl AnnotatingWriter {
    pub fn new(store: Arc<dyn ObjectStore>, config: &TenancyConfig, kind: ResourceKind) -> Self {
        Self {
            store,
            keys: KeyBuilder::for_kind(config, &kind),
            kind,
            scope: RequestScope::Unscoped,
            global_admin: config.global_admin.clone(),
        }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Storage key of `namespace`/`name` for the bound tenant.
    pub fn key_for(&self, namespace: Option<&str>, name: &str) -> TenancyResult<String> {
        match (self.kind.namespaced, namespace) {
            (true, Some(ns)) => self.keys.namespaced_key(&self.scope, ns, name, true),
            (true, None) => Err(ValidationError::RequiredFieldMissing {
                field: "namespace".to_string(),
            }
            .into()),
            (false, _) => self.keys.cluster_key(&self.scope, name, true),
        }
    }

    fn check_kind(&self, obj: &StoredObject) -> TenancyResult<()> {
        if obj.kind != self.kind {
            return Err(ValidationError::InvalidValue {
                field: "kind".to_string(),
                reason: format!("writer handles {}, got {}", self.kind, obj.kind),
            }
            .into());
        }
        Ok(())
    }

    pub async fn get(&self, namespace: Option<&str>, name: &str) -> TenancyResult<StoredObject> {
        let key = self.key_for(namespace, name)?;
        self.store
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound { key }.into())
    }

    pub async fn create(&self, mut obj: StoredObject) -> TenancyResult<StoredObject> {
        self.check_kind(&obj)?;
        let key = self.key_for(obj.namespace(), obj.name())?;
        gate::reconcile_reserved_annotations(&self.scope, &key, None, &mut obj.meta.annotations)?;
        let created = self.store.create(&key, obj).await?;
        info!(key = %key, "Created tenant object");
        Ok(created)
    }

    pub async fn update(&self, mut obj: StoredObject) -> TenancyResult<StoredObject> {
        self.check_kind(&obj)?;
        let key = self.key_for(obj.namespace(), obj.name())?;
        let existing = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound { key: key.clone() })?;
        let outcome = gate::reconcile_reserved_annotations(
            &self.scope,
            &key,
            Some(&existing.meta.annotations),
            &mut obj.meta.annotations,
        )?;
        debug!(key = %key, restored = outcome.restored.len(), "Updating tenant object");
        self.store.update(&key, obj).await
    }

    pub async fn delete(&self, namespace: Option<&str>, name: &str) -> TenancyResult<StoredObject> {
        let key = self.key_for(namespace, name)?;
        let removed = self.store.delete(&key).await?;
        info!(key = %key, "Deleted tenant object");
        Ok(removed)
    }
}

impl Rescope for AnnotatingWriter {
    fn rescope(&self, tenant: &TenantIdentity) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
            kind: self.kind.clone(),
            scope: RequestScope::resolve(Some(tenant.clone()), &self.global_admin),
            global_admin: self.global_admin.clone(),
        }
    }

    fn bound_tenant(&self) -> Option<&TenantIdentity> {
        self.scope.tenant()
    }
}

/// Reader and writer for one resource kind, re-scoped together.
#[derive(Clone, Debug)]
pub struct ClientSet {
    lister: Scoped<TenantLister>,
    writer: Scoped<AnnotatingWriter>,
}

impl ClientSet {
    pub const LISTER: &'static str = "lister";
    pub const WRITER: &'static str = "writer";
    pub const NAME: &'static str = "client-set";

    pub fn new(
        lister: Dependency<TenantLister>,
        writer: Dependency<AnnotatingWriter>,
    ) -> TenancyResult<Self> {
        Ok(Self {
            lister: lister.require(Self::LISTER)?,
            writer: writer.require(Self::WRITER)?,
        })
    }

    pub fn lister(&self) -> &TenantLister {
        &self.lister
    }

    pub fn writer(&self) -> &AnnotatingWriter {
        &self.writer
    }

    /// Add this composite and its parts to a composition graph.
    pub fn declare(root: CompositionRoot) -> CompositionRoot {
        root.collaborator(Self::LISTER, true, &[])
            .collaborator(Self::WRITER, true, &[])
            .collaborator(Self::NAME, true, &[Self::LISTER, Self::WRITER])
    }
}

impl Rescope for ClientSet {
    fn rescope(&self, tenant: &TenantIdentity) -> Self {
        Self {
            lister: self.lister.rescope(tenant),
            writer: self.writer.rescope(tenant),
        }
    }

    fn bound_tenant(&self) -> Option<&TenantIdentity> {
        self.writer.bound_tenant()
    }
}
