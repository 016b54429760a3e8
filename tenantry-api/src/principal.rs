//! Principal-extension encoding of the tenant triple.
//!
//! An authenticated principal carries the triple as three multi-valued
//! extension fields whose names are the reserved annotation keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tenantry_core::annotations::annotation_key;
use tenantry_core::identity::validate_field;
use tenantry_core::{DecodeError, TenancyResult, TenantField, TenantIdentity};

const SOURCE: &str = "user extra";

/// Authenticated request principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Write the triple into the principal's extension fields, replacing any
/// values already there.
pub fn attach_tenant(user: &mut UserInfo, tenant: &TenantIdentity) {
    for field in TenantField::ALL {
        user.extra.insert(
            annotation_key(field).to_string(),
            vec![tenant.field(field).to_string()],
        );
    }
}

/// Remove the triple from the principal's extension fields.
pub fn detach_tenant(user: &mut UserInfo) {
    for field in TenantField::ALL {
        user.extra.remove(annotation_key(field));
    }
}

/// Decode the triple; every field must be present with exactly one value.
pub fn decode_extra(extra: &BTreeMap<String, Vec<String>>) -> TenancyResult<TenantIdentity> {
    let missing: Vec<TenantField> = TenantField::ALL
        .into_iter()
        .filter(|f| extra.get(annotation_key(*f)).map_or(true, Vec::is_empty))
        .collect();
    if !missing.is_empty() {
        return Err(DecodeError::MissingFields {
            source_kind: SOURCE,
            missing,
        }
        .into());
    }

    let mut values = Vec::with_capacity(3);
    for field in TenantField::ALL {
        let entries = extra.get(annotation_key(field)).map(Vec::as_slice).unwrap_or_default();
        let [value] = entries else {
            return Err(DecodeError::ValueCount {
                source_kind: SOURCE,
                field,
                count: entries.len(),
            }
            .into());
        };
        validate_field(field, value).map_err(|e| DecodeError::Malformed {
            source_kind: SOURCE,
            field,
            reason: e.to_string(),
        })?;
        values.push(value.clone());
    }

    let mut values = values.into_iter();
    TenantIdentity::new(
        values.next().unwrap_or_default(),
        values.next().unwrap_or_default(),
        values.next().unwrap_or_default(),
    )
}

/// Decode the triple from a principal.
///
/// `None` only when the principal carries none of the three fields, which
/// marks an internal caller. Partial info is a decode failure.
pub fn tenant_from_extra(user: &UserInfo) -> TenancyResult<Option<TenantIdentity>> {
    let any_present = TenantField::ALL
        .iter()
        .any(|f| user.extra.contains_key(annotation_key(*f)));
    if !any_present {
        return Ok(None);
    }
    decode_extra(&user.extra).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::{TenancyError, TENANT_ANNOTATION};

    fn t1() -> TenantIdentity {
        TenantIdentity::new("t1", "w1", "c1").expect("valid identity")
    }

    #[test]
    fn test_attach_and_decode() -> TenancyResult<()> {
        let mut user = UserInfo::new("alice");
        attach_tenant(&mut user, &t1());
        assert_eq!(user.extra.len(), 3);
        assert_eq!(tenant_from_extra(&user)?, Some(t1()));
        detach_tenant(&mut user);
        assert_eq!(tenant_from_extra(&user)?, None);
        Ok(())
    }

    #[test]
    fn test_value_count_must_be_one() {
        let mut user = UserInfo::new("alice");
        attach_tenant(&mut user, &t1());
        user.extra
            .insert(TENANT_ANNOTATION.into(), vec!["t1".into(), "t2".into()]);
        let err = tenant_from_extra(&user).unwrap_err();
        assert!(matches!(
            err,
            TenancyError::Decode(DecodeError::ValueCount { count: 2, field: TenantField::Tenant, .. })
        ));
    }

    #[test]
    fn test_partial_is_failure() {
        let mut user = UserInfo::new("alice");
        attach_tenant(&mut user, &t1());
        user.extra.remove(annotation_key(TenantField::Workspace));
        let err = tenant_from_extra(&user).unwrap_err();
        assert!(err.to_string().contains("workspace"));
    }

    #[test]
    fn test_empty_value_list_is_missing() {
        let mut user = UserInfo::new("alice");
        attach_tenant(&mut user, &t1());
        user.extra.insert(TENANT_ANNOTATION.into(), Vec::new());
        let err = decode_extra(&user.extra).unwrap_err();
        assert!(matches!(err, TenancyError::Decode(DecodeError::MissingFields { .. })));
    }

    #[test]
    fn test_malformed_value() {
        let mut user = UserInfo::new("alice");
        attach_tenant(&mut user, &t1());
        user.extra.insert(TENANT_ANNOTATION.into(), vec!["a/b".into()]);
        let err = decode_extra(&user.extra).unwrap_err();
        assert!(matches!(err, TenancyError::Decode(DecodeError::Malformed { .. })));
    }
}
