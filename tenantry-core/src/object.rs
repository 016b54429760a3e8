//! Persisted object model shared by the cache, the store and the gate.

use crate::annotations::{self, Annotations};
use crate::error::TenancyResult;
use crate::identity::TenantIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// API group and resource name, plus whether instances live in a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    /// API group; empty for the core group.
    pub group: String,
    /// Plural resource name, e.g. `configmaps`.
    pub resource: String,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn namespaced(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            namespaced: true,
        }
    }

    pub fn cluster_scoped(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            namespaced: false,
        }
    }

    /// Storage prefix for this resource family, e.g. `/registry/apps/deployments`.
    pub fn storage_prefix(&self, root: &str) -> String {
        let root = root.trim_end_matches('/');
        if self.group.is_empty() {
            format!("{}/{}", root, self.resource)
        } else {
            format!("{}/{}/{}", root, self.group, self.resource)
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub uid: Uuid,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: Annotations,
    #[serde(default)]
    pub resource_version: u64,
    pub creation_timestamp: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            uid: Uuid::now_v7(),
            labels: BTreeMap::new(),
            annotations: Annotations::new(),
            resource_version: 0,
            creation_timestamp: Utc::now(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_tenant(mut self, tenant: &TenantIdentity) -> Self {
        annotations::encode_into(tenant, &mut self.annotations);
        self
    }

    /// Decoded tenant annotations; `None` for objects created outside any tenant.
    pub fn tenant(&self) -> TenancyResult<Option<TenantIdentity>> {
        annotations::decode_optional(&self.annotations)
    }

    pub fn namespace_str(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}

/// A persisted domain object carrying tenant annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub kind: ResourceKind,
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl StoredObject {
    pub fn new(kind: ResourceKind, meta: ObjectMeta) -> Self {
        Self {
            kind,
            meta,
            spec: serde_json::Value::Null,
        }
    }

    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta.namespace.as_deref()
    }

    pub fn tenant(&self) -> TenancyResult<Option<TenantIdentity>> {
        self.meta.tenant()
    }
}
