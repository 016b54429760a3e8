//! Error types for tenancy operations
//!
//! One enum per failure family, folded into [`TenancyError`]. Nothing in this
//! layer retries; callers inspect [`TenancyError::is_retryable`] and apply
//! their own policy.

use crate::identity::TenantField;
use thiserror::Error;

/// Tenant information could not be decoded from a credential or stored object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing or malformed tenant info in {source_kind}: missing {}", join_fields(.missing))]
    MissingFields {
        source_kind: &'static str,
        missing: Vec<TenantField>,
    },

    #[error("tenant field {field} in {source_kind} has {count} values, expected exactly 1")]
    ValueCount {
        source_kind: &'static str,
        field: TenantField,
        count: usize,
    },

    #[error("tenant field {field} in {source_kind} is malformed: {reason}")]
    Malformed {
        source_kind: &'static str,
        field: TenantField,
        reason: String,
    },

    #[error("conflicting values for tenant field {field} in {source_kind}")]
    Conflicting {
        source_kind: &'static str,
        field: TenantField,
    },

    #[error("invalid joint tenant string {value:?}: {reason}")]
    InvalidJointString { value: String, reason: String },

    #[error("invalid credential: {reason}")]
    InvalidCredential { reason: String },
}

fn join_fields(fields: &[TenantField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A namespaced or point operation was attempted without a resolved tenant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("cannot {operation} without tenant")]
    MissingTenant { operation: String },

    #[error("object {key} belongs to tenant {owner}, not {requester}")]
    TenantMismatch {
        key: String,
        owner: String,
        requester: String,
    },
}

/// Client-visible, non-retryable policy rejection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("administrative identity may only list/watch, not {operation}")]
    AdminPointOperation { operation: String },

    #[error("resource {resource} in group {group:?} is not available to tenants")]
    ResourceNotAllowed { group: String, resource: String },

    #[error("reserved annotation {key} cannot be changed")]
    ReservedAnnotation { key: String },
}

/// Programming errors in how collaborators were wired together.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompositionError {
    #[error("collaborator {collaborator} does not support re-scoping")]
    CapabilityMissing { collaborator: String },

    #[error("collaborator {collaborator} depends on unknown collaborator {dependency}")]
    UnknownDependency {
        collaborator: String,
        dependency: String,
    },

    #[error("collaborator {collaborator} is declared twice")]
    DuplicateCollaborator { collaborator: String },

    #[error("composition graph has a cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Storage and cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("object already exists: {key}")]
    AlreadyExists { key: String },

    #[error("index {index_name} does not exist")]
    IndexNotFound { index_name: String },

    #[error("Index error on {index_name}: {reason}")]
    IndexFailed { index_name: String, reason: String },

    #[error("resource version conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for tenancy operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenancyError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Scope violation: {0}")]
    Scope(#[from] ScopeError),

    #[error("Policy rejection: {0}")]
    Policy(#[from] PolicyError),

    #[error("Composition error: {0}")]
    Composition(#[from] CompositionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("External dependency {dependency} failed: {reason}")]
    External { dependency: String, reason: String },
}

impl TenancyError {
    /// Shorthand for an external-dependency failure.
    pub fn external(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::External {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a missing-tenant scope violation.
    pub fn missing_tenant(operation: impl Into<String>) -> Self {
        Self::Scope(ScopeError::MissingTenant {
            operation: operation.into(),
        })
    }

    /// Only external-dependency failures are worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::External { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

// =============================================================================
// TESTS
// =============================================================================
