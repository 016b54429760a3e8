//! Enforcement gate: the fail-closed checks run wherever tenant-aware pieces
//! are assembled.

use crate::annotations::{self, annotation_key, Annotations};
use crate::error::{ScopeError, TenancyResult};
use crate::identity::{RequestScope, TenantField, TenantIdentity};
use std::backtrace::Backtrace;
use tracing::{error, warn};

/// Refuse a namespaced or point operation without a resolved tenant.
///
/// The global administrator is rejected here too; callers that allow the
/// administrator must branch before calling. The failure is logged with a
/// captured backtrace for forensics.
pub fn require_tenant<'a>(scope: &'a RequestScope, operation: &str) -> TenancyResult<&'a TenantIdentity> {
    match scope {
        RequestScope::Tenant(tenant) => Ok(tenant),
        _ => {
            let trace = Backtrace::force_capture();
            error!(
                operation,
                scope = ?scope,
                backtrace = %trace,
                "Refusing operation without tenant"
            );
            Err(ScopeError::MissingTenant {
                operation: operation.to_string(),
            }
            .into())
        }
    }
}

/// Reserved keys restored or stamped during reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub restored: Vec<String>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.restored.is_empty()
    }
}

/// Keep the reserved annotations of a mutated object under system control.
///
/// - `Unscoped` callers are the system itself and pass through untouched.
/// - A tenant creating an object gets its own triple stamped over whatever
///   it supplied; supplying another tenant's triple is a mismatch.
/// - A tenant updating an object must own it, and any change or removal of
///   a reserved key is reverted to the stored value.
/// - The global administrator skips the ownership checks, but reserved keys
///   are still restored on update.
pub fn reconcile_reserved_annotations(
    scope: &RequestScope,
    key: &str,
    existing: Option<&Annotations>,
    incoming: &mut Annotations,
) -> TenancyResult<Reconciliation> {
    let requester = match scope {
        RequestScope::Unscoped => return Ok(Reconciliation::default()),
        RequestScope::GlobalAdmin => None,
        RequestScope::Tenant(t) => Some(t),
    };

    let Some(existing) = existing else {
        return Ok(stamp_on_create(requester, key, incoming)?);
    };

    if let Some(requester) = requester {
        if let Some(owner) = annotations::decode_optional(existing)? {
            if &owner != requester {
                return Err(mismatch(key, &owner.to_joint_string(), requester));
            }
        }
    }

    let mut outcome = Reconciliation::default();
    for field in TenantField::ALL {
        let reserved = annotation_key(field);
        let before = existing.get(reserved);
        let after = incoming.get(reserved);
        if before == after {
            continue;
        }
        match before {
            Some(value) => {
                incoming.insert(reserved.to_string(), value.clone());
            }
            None => {
                incoming.remove(reserved);
            }
        }
        outcome.restored.push(reserved.to_string());
    }

    if !outcome.is_noop() {
        warn!(key, restored = ?outcome.restored, "Restored reserved tenant annotations");
    }
    Ok(outcome)
}

fn stamp_on_create(
    requester: Option<&TenantIdentity>,
    key: &str,
    incoming: &mut Annotations,
) -> TenancyResult<Reconciliation> {
    let Some(requester) = requester else {
        return Ok(Reconciliation::default());
    };

    let supplied = annotations::strip(incoming);
    for (reserved, value) in &supplied {
        let field = TenantField::ALL
            .into_iter()
            .find(|f| annotation_key(*f) == reserved);
        if let Some(field) = field {
            if value != requester.field(field) {
                return Err(mismatch(key, value, requester));
            }
        }
    }

    annotations::encode_into(requester, incoming);
    Ok(Reconciliation {
        restored: TenantField::ALL
            .iter()
            .map(|f| annotation_key(*f).to_string())
            .filter(|k| !supplied.contains_key(k))
            .collect(),
    })
}

fn mismatch(key: &str, owner: &str, requester: &TenantIdentity) -> crate::error::TenancyError {
    error!(key, owner, requester = %requester, "Cross-tenant mutation rejected");
    ScopeError::TenantMismatch {
        key: key.to_string(),
        owner: owner.to_string(),
        requester: requester.to_joint_string(),
    }
    .into()
}
