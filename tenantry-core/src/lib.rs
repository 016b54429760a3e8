//! Tenantry Core - Tenant Identity Model
//!
//! The tenant triple, its joint-string and annotation encodings, the object
//! model the cache and store hold, label selectors, and the error taxonomy
//! every other crate returns.

pub mod annotations;
pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod object;
pub mod selector;

pub use annotations::{
    Annotations, ANNOTATION_PREFIX, CLUSTER_ANNOTATION, TENANT_ANNOTATION, WORKSPACE_ANNOTATION,
};
pub use config::TenancyConfig;
pub use error::{
    CompositionError, ConfigError, DecodeError, PolicyError, ScopeError, StorageError,
    TenancyError, TenancyResult, ValidationError,
};
pub use gate::{reconcile_reserved_annotations, require_tenant, Reconciliation};
pub use identity::{RequestScope, TenantField, TenantIdentity, GLOBAL_ADMIN_VALUE, JOINT_DELIMITER};
pub use object::{ObjectMeta, ResourceKind, StoredObject};
pub use selector::{LabelSelector, Requirement, SelectorOperator};
