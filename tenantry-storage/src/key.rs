//! Key constructor for tenant-partitioned storage and cache keys.
//!
//! Tenant-scoped layout:  `<prefix>/<tenant>/<workspace>/<cluster>[/<namespace>]/<name>`
//! Global layout:         `<prefix>[/<namespace>]/<name>`
//!
//! Strict mode is used for point operations. In strict mode a global scope
//! (internal caller or global administrator) is refused: administrators may
//! enumerate everything but must pick a tenant before addressing one object.

use tenantry_core::annotations::annotation_key;
use tenantry_core::{
    PolicyError, RequestScope, ResourceKind, StoredObject, TenancyConfig, TenancyResult,
    TenantField, ValidationError,
};

/// Resolved key root for a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRoot {
    pub path: String,
    pub is_global: bool,
}

/// Builds keys for one resource family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Builder for `kind` under the configured storage root.
    pub fn for_kind(config: &TenancyConfig, kind: &ResourceKind) -> Self {
        Self::new(kind.storage_prefix(&config.key_prefix))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key root for `scope`.
    ///
    /// Returns the un-prefixed root with `is_global = true` for internal and
    /// administrative callers, unless `strict` is set, in which case those
    /// callers are refused with a policy error.
    pub fn scope_root(&self, scope: &RequestScope, strict: bool) -> TenancyResult<KeyRoot> {
        match scope {
            RequestScope::Tenant(tenant) => Ok(KeyRoot {
                path: format!(
                    "{}/{}/{}/{}",
                    self.prefix,
                    tenant.tenant(),
                    tenant.workspace(),
                    tenant.cluster()
                ),
                is_global: false,
            }),
            RequestScope::Unscoped | RequestScope::GlobalAdmin if strict => {
                Err(PolicyError::AdminPointOperation {
                    operation: "address a single object".to_string(),
                }
                .into())
            }
            RequestScope::Unscoped | RequestScope::GlobalAdmin => Ok(KeyRoot {
                path: self.prefix.clone(),
                is_global: true,
            }),
        }
    }

    /// Key of a namespaced object.
    pub fn namespaced_key(
        &self,
        scope: &RequestScope,
        namespace: &str,
        name: &str,
        strict: bool,
    ) -> TenancyResult<String> {
        validate_path_segment("namespace", namespace)?;
        validate_path_segment("name", name)?;
        let root = self.scope_root(scope, strict)?;
        Ok(format!("{}/{}/{}", root.path, namespace, name))
    }

    /// Key of a cluster-scoped object.
    pub fn cluster_key(&self, scope: &RequestScope, name: &str, strict: bool) -> TenancyResult<String> {
        validate_path_segment("name", name)?;
        let root = self.scope_root(scope, strict)?;
        Ok(format!("{}/{}", root.path, name))
    }

    /// Prefix covering every object visible to `scope`, optionally in one namespace.
    ///
    /// Always non-strict. The trailing `/` keeps `t1` from matching `t10`.
    pub fn list_prefix(&self, scope: &RequestScope, namespace: Option<&str>) -> TenancyResult<String> {
        let root = self.scope_root(scope, false)?;
        match namespace {
            Some(ns) => {
                validate_path_segment("namespace", ns)?;
                Ok(format!("{}/{}/", root.path, ns))
            }
            None => Ok(format!("{}/", root.path)),
        }
    }
}

/// Check that `value` can be used as one path segment.
pub fn validate_path_segment(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    if value == "." || value == ".." {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("may not be '{}'", value),
        });
    }
    if let Some(bad) = value.chars().find(|c| *c == '/' || *c == '%') {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("may not contain '{}'", bad),
        });
    }
    Ok(())
}

/// Key of an object in the shared cache, which holds every resource kind.
///
/// `kind/tenant/workspace/cluster/namespace/name` for tenant objects and
/// `kind/namespace/name` (or `kind/name`) for objects outside any tenant.
/// `kind` is the resource, suffixed with `.group` outside the core group.
///
/// Objects whose tenant annotations do not decode are keyed by their raw
/// values behind an empty segment, `kind//tenant/workspace/cluster/...`,
/// with absent fields left empty. Valid tenant fields are never empty, so
/// these keys cannot collide with a decodable object and the cache can still
/// hold them while the tenant indices report the failure.
pub fn cache_key(obj: &StoredObject) -> String {
    let local = local_key(obj.namespace(), obj.name());
    match obj.tenant() {
        Ok(Some(tenant)) => format!("{}/{}/{}", obj.kind, tenant.to_joint_string(), local),
        Ok(None) => format!("{}/{}", obj.kind, local),
        Err(_) => {
            let raw: Vec<&str> = TenantField::ALL
                .iter()
                .map(|f| {
                    obj.meta
                        .annotations
                        .get(annotation_key(*f))
                        .map_or("", String::as_str)
                })
                .collect();
            format!("{}//{}/{}", obj.kind, raw.join("/"), local)
        }
    }
}

/// Cache key for a lookup of `kind` by tenant, namespace and name.
pub fn scoped_cache_key(
    kind: &ResourceKind,
    scope: &RequestScope,
    namespace: Option<&str>,
    name: &str,
) -> String {
    let local = local_key(namespace, name);
    match scope.tenant() {
        Some(tenant) => format!("{}/{}/{}", kind, tenant.to_joint_string(), local),
        None => format!("{}/{}", kind, local),
    }
}

fn local_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}
