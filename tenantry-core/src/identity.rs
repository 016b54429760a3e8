//! Tenant identity: the (tenant, workspace, cluster) triple every isolation
//! decision keys on.

use crate::error::{DecodeError, TenancyResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Delimiter used by the joint-string form. Forbidden inside field values.
pub const JOINT_DELIMITER: char = '/';

/// Value used for all three fields of the reserved global-administrator identity.
pub const GLOBAL_ADMIN_VALUE: &str = "*";

/// One of the three tenant fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantField {
    Tenant,
    Workspace,
    Cluster,
}

impl TenantField {
    pub const ALL: [TenantField; 3] = [Self::Tenant, Self::Workspace, Self::Cluster];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Workspace => "workspace",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for TenantField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable tenant triple.
///
/// Fields are private; the only constructors validate that each field is
/// non-empty and free of the joint-string delimiter, so the joint form
/// `tenant/workspace/cluster` always parses back to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawTenantIdentity", into = "RawTenantIdentity")]
pub struct TenantIdentity {
    tenant: String,
    workspace: String,
    cluster: String,
}

#[derive(Serialize, Deserialize)]
struct RawTenantIdentity {
    tenant: String,
    workspace: String,
    cluster: String,
}

impl TryFrom<RawTenantIdentity> for TenantIdentity {
    type Error = ValidationError;

    fn try_from(raw: RawTenantIdentity) -> Result<Self, Self::Error> {
        Self::validated(raw.tenant, raw.workspace, raw.cluster)
    }
}

impl From<TenantIdentity> for RawTenantIdentity {
    fn from(id: TenantIdentity) -> Self {
        Self {
            tenant: id.tenant,
            workspace: id.workspace,
            cluster: id.cluster,
        }
    }
}

impl TenantIdentity {
    /// Build a tenant identity, validating every field.
    pub fn new(
        tenant: impl Into<String>,
        workspace: impl Into<String>,
        cluster: impl Into<String>,
    ) -> TenancyResult<Self> {
        Ok(Self::validated(tenant.into(), workspace.into(), cluster.into())?)
    }

    fn validated(tenant: String, workspace: String, cluster: String) -> Result<Self, ValidationError> {
        validate_field(TenantField::Tenant, &tenant)?;
        validate_field(TenantField::Workspace, &workspace)?;
        validate_field(TenantField::Cluster, &cluster)?;
        Ok(Self {
            tenant,
            workspace,
            cluster,
        })
    }

    /// The reserved identity that disables per-tenant filtering for a call.
    pub fn global_admin() -> Self {
        Self {
            tenant: GLOBAL_ADMIN_VALUE.to_string(),
            workspace: GLOBAL_ADMIN_VALUE.to_string(),
            cluster: GLOBAL_ADMIN_VALUE.to_string(),
        }
    }

    pub fn is_global_admin(&self) -> bool {
        self.tenant == GLOBAL_ADMIN_VALUE
            && self.workspace == GLOBAL_ADMIN_VALUE
            && self.cluster == GLOBAL_ADMIN_VALUE
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn field(&self, field: TenantField) -> &str {
        match field {
            TenantField::Tenant => &self.tenant,
            TenantField::Workspace => &self.workspace,
            TenantField::Cluster => &self.cluster,
        }
    }

    /// `tenant/workspace/cluster`, used wherever a single string key is required.
    pub fn to_joint_string(&self) -> String {
        format!(
            "{}{d}{}{d}{}",
            self.tenant,
            self.workspace,
            self.cluster,
            d = JOINT_DELIMITER
        )
    }

    /// Parse the joint-string form.
    ///
    /// Splits on the first two delimiters only. Any delimiter left in the
    /// remainder fails cluster validation, so no input decodes ambiguously.
    pub fn parse_joint(value: &str) -> TenancyResult<Self> {
        let mut parts = value.splitn(3, JOINT_DELIMITER);
        let (Some(tenant), Some(workspace), Some(cluster)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DecodeError::InvalidJointString {
                value: value.to_string(),
                reason: "expected tenant/workspace/cluster".to_string(),
            }
            .into());
        };

        Self::validated(tenant.to_string(), workspace.to_string(), cluster.to_string()).map_err(
            |e| {
                DecodeError::InvalidJointString {
                    value: value.to_string(),
                    reason: e.to_string(),
                }
                .into()
            },
        )
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_joint_string())
    }
}

impl FromStr for TenantIdentity {
    type Err = crate::error::TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_joint(s)
    }
}

/// Check a single tenant field value.
pub fn validate_field(field: TenantField, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.as_str().to_string(),
        });
    }
    if value.contains(JOINT_DELIMITER) {
        return Err(ValidationError::InvalidValue {
            field: field.as_str().to_string(),
            reason: format!("must not contain '{}'", JOINT_DELIMITER),
        });
    }
    if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::InvalidValue {
            field: field.as_str().to_string(),
            reason: "must not contain whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

/// Tenant scope resolved for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestScope {
    /// No tenant claims at all; the caller is internal to the process.
    Unscoped,
    /// The reserved administrator identity.
    GlobalAdmin,
    /// An ordinary tenant.
    Tenant(TenantIdentity),
}

impl RequestScope {
    /// Scope of `tenant` when only the reserved `*/*/*` identity is the
    /// administrator. Use [`RequestScope::resolve`] when a custom
    /// administrator identity may be configured.
    pub fn from_tenant(tenant: Option<TenantIdentity>) -> Self {
        Self::resolve(tenant, &TenantIdentity::global_admin())
    }

    /// Scope of `tenant` given the configured administrator identity.
    /// The reserved sentinel is always an administrator as well.
    pub fn resolve(tenant: Option<TenantIdentity>, global_admin: &TenantIdentity) -> Self {
        match tenant {
            None => Self::Unscoped,
            Some(t) if t.is_global_admin() || t == *global_admin => Self::GlobalAdmin,
            Some(t) => Self::Tenant(t),
        }
    }

    /// True when tenant filtering is disabled for this call.
    pub fn is_global(&self) -> bool {
        !matches!(self, Self::Tenant(_))
    }

    pub fn tenant(&self) -> Option<&TenantIdentity> {
        match self {
            Self::Tenant(t) => Some(t),
            _ => None,
        }
    }
}

impl From<Option<TenantIdentity>> for RequestScope {
    fn from(tenant: Option<TenantIdentity>) -> Self {
        Self::from_tenant(tenant)
    }
}
