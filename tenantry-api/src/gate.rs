//! Request-path half of the enforcement gate: the resource allow-list.
//!
//! Ordinary tenants may only address the (group, resource) pairs listed
//! here. The global administrator, impersonated calls from the trusted
//! administrator, internal unscoped callers and principals in a group
//! carrying one of the configured suffixes are exempt.

use crate::auth::{AuthContext, AuthMethod};
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tenantry_core::{ConfigError, PolicyError, RequestScope, TenancyResult};
use tracing::{debug, info};

/// Environment variable naming a YAML allow-list file.
pub const ALLOW_LIST_PATH_ENV: &str = "TENANTRY_ALLOW_LIST_PATH";

const DEFAULT_ALLOW_LIST: &str = r#"
resources:
  - { group: "", resource: pods }
  - { group: "", resource: services }
  - { group: "", resource: endpoints }
  - { group: "", resource: configmaps }
  - { group: "", resource: secrets }
  - { group: "", resource: serviceaccounts }
  - { group: "", resource: persistentvolumeclaims }
  - { group: "", resource: events }
  - { group: "", resource: namespaces }
  - { group: apps, resource: deployments }
  - { group: apps, resource: statefulsets }
  - { group: apps, resource: daemonsets }
  - { group: apps, resource: replicasets }
  - { group: batch, resource: jobs }
  - { group: batch, resource: cronjobs }
  - { group: rbac.authorization.k8s.io, resource: roles }
  - { group: rbac.authorization.k8s.io, resource: rolebindings }
groupSuffixes:
  - ":tenant-operators"
"#;

/// One allowed (API group, resource) pair. The core group is `""`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllowedResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllowList {
    #[serde(default)]
    pub resources: BTreeSet<AllowedResource>,
    /// Principals in a group ending with any of these skip the list.
    #[serde(default)]
    pub group_suffixes: Vec<String>,
}

impl ResourceAllowList {
    pub fn from_yaml(yaml: &str) -> TenancyResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidValue {
                field: "allow_list".to_string(),
                value: "<yaml>".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn load(path: &Path) -> TenancyResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            field: ALLOW_LIST_PATH_ENV.to_string(),
            value: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let list = Self::from_yaml(&raw)?;
        info!(path = %path.display(), resources = list.resources.len(), "Loaded resource allow-list");
        Ok(list)
    }

    /// The list named by `TENANTRY_ALLOW_LIST_PATH`, or the built-in default.
    pub fn from_env() -> TenancyResult<Self> {
        match std::env::var(ALLOW_LIST_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim())),
            _ => Self::builtin(),
        }
    }

    pub fn builtin() -> TenancyResult<Self> {
        Self::from_yaml(DEFAULT_ALLOW_LIST)
    }

    pub fn allow(mut self, group: &str, resource: &str) -> Self {
        self.resources.insert(AllowedResource {
            group: group.to_string(),
            resource: resource.to_string(),
        });
        self
    }

    pub fn contains(&self, group: &str, resource: &str) -> bool {
        self.resources.iter().any(|r| r.group == group && r.resource == resource)
    }

    /// Decide whether `auth` may address the resource named by `info`.
    pub fn authorize(&self, auth: &AuthContext, info: &RequestInfo) -> TenancyResult<()> {
        if !info.is_resource_request {
            return Ok(());
        }
        let exempt = match &auth.scope {
            RequestScope::GlobalAdmin | RequestScope::Unscoped => true,
            RequestScope::Tenant(_) => {
                auth.method == AuthMethod::Impersonation
                    || auth
                        .user
                        .groups
                        .iter()
                        .any(|g| self.group_suffixes.iter().any(|s| g.ends_with(s.as_str())))
            }
        };
        if exempt || self.contains(&info.api_group, &info.resource) {
            return Ok(());
        }
        debug!(group = %info.api_group, resource = %info.resource, user = %auth.user.name, "Resource not allow-listed");
        Err(PolicyError::ResourceNotAllowed {
            group: info.api_group.clone(),
            resource: info.resource.clone(),
        }
        .into())
    }
}

/// Resource coordinates parsed from a request path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub is_resource_request: bool,
    pub verb: String,
    pub api_group: String,
    pub api_version: String,
    pub namespace: Option<String>,
    pub resource: String,
    pub name: Option<String>,
    pub subresource: Option<String>,
}

impl RequestInfo {
    /// Parse `/api/v1/...` and `/apis/{group}/{version}/...` paths. Anything
    /// else is a non-resource request.
    pub fn parse(method: &Method, path: &str) -> Self {
        let parts: Vec<&str> = path
            .split('?')
            .next()
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let (api_group, api_version, rest) = match parts.as_slice() {
            ["api", version, rest @ ..] => (String::new(), version.to_string(), rest),
            ["apis", group, version, rest @ ..] => (group.to_string(), version.to_string(), rest),
            _ => {
                return Self {
                    verb: method.as_str().to_ascii_lowercase(),
                    ..Self::default()
                }
            }
        };
        if rest.is_empty() {
            return Self {
                verb: method.as_str().to_ascii_lowercase(),
                api_group,
                api_version,
                ..Self::default()
            };
        }

        // `namespaces/{ns}/{resource}...` is namespaced unless it names the
        // namespace object itself.
        let (namespace, rest) = match rest {
            ["namespaces", ns, tail @ ..] if !tail.is_empty() => (Some(ns.to_string()), tail),
            _ => (None, rest),
        };
        let resource = rest[0].to_string();
        let name = rest.get(1).map(|s| s.to_string());
        let subresource = rest.get(2).map(|s| s.to_string());

        let verb = match (method.as_str(), name.is_some()) {
            ("GET" | "HEAD", true) => "get",
            ("GET" | "HEAD", false) => "list",
            ("POST", _) => "create",
            ("PUT", _) => "update",
            ("PATCH", _) => "patch",
            ("DELETE", true) => "delete",
            ("DELETE", false) => "deletecollection",
            _ => "unknown",
        }
        .to_string();

        Self {
            is_resource_request: true,
            verb,
            api_group,
            api_version,
            namespace,
            resource,
            name,
            subresource,
        }
    }
}
