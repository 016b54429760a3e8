//! Annotation codec: tenant triple <-> reserved object annotations.

use crate::error::{DecodeError, TenancyResult};
use crate::identity::{validate_field, TenantField, TenantIdentity};
use std::collections::BTreeMap;

/// Prefix shared by every reserved tenancy key.
pub const ANNOTATION_PREFIX: &str = "multitenancy.io/";

pub const TENANT_ANNOTATION: &str = "multitenancy.io/tenant";
pub const WORKSPACE_ANNOTATION: &str = "multitenancy.io/workspace";
pub const CLUSTER_ANNOTATION: &str = "multitenancy.io/cluster";

/// Map of annotation key to value as stored on object metadata.
pub type Annotations = BTreeMap<String, String>;

/// The reserved annotation key for a tenant field.
pub fn annotation_key(field: TenantField) -> &'static str {
    match field {
        TenantField::Tenant => TENANT_ANNOTATION,
        TenantField::Workspace => WORKSPACE_ANNOTATION,
        TenantField::Cluster => CLUSTER_ANNOTATION,
    }
}

/// True for the three keys only the system may write.
pub fn is_reserved_key(key: &str) -> bool {
    key == TENANT_ANNOTATION || key == WORKSPACE_ANNOTATION || key == CLUSTER_ANNOTATION
}

/// Encode a tenant identity as a fresh annotation map.
pub fn encode(tenant: &TenantIdentity) -> Annotations {
    let mut annotations = Annotations::new();
    encode_into(tenant, &mut annotations);
    annotations
}

/// Write the tenant triple into an existing annotation map.
pub fn encode_into(tenant: &TenantIdentity, annotations: &mut Annotations) {
    encode_fields(
        tenant.tenant(),
        tenant.workspace(),
        tenant.cluster(),
        annotations,
    );
}

/// Write raw tenant field values, skipping empty ones.
///
/// Objects created before a field existed carry only a subset; writing an
/// empty string would turn "absent" into "malformed".
pub fn encode_fields(tenant: &str, workspace: &str, cluster: &str, annotations: &mut Annotations) {
    for (key, value) in [
        (TENANT_ANNOTATION, tenant),
        (WORKSPACE_ANNOTATION, workspace),
        (CLUSTER_ANNOTATION, cluster),
    ] {
        if !value.is_empty() {
            annotations.insert(key.to_string(), value.to_string());
        }
    }
}

/// Decode the tenant triple; any absent field is a hard failure.
pub fn decode(annotations: &Annotations) -> TenancyResult<TenantIdentity> {
    decode_optional(annotations)?.ok_or_else(|| {
        DecodeError::MissingFields {
            source_kind: "annotations",
            missing: TenantField::ALL.to_vec(),
        }
        .into()
    })
}

/// Decode the tenant triple, treating "no tenant annotations at all" as `None`.
///
/// Partial tenant info is never "untenanted": one or two present fields
/// fail with the list of the missing ones.
pub fn decode_optional(annotations: &Annotations) -> TenancyResult<Option<TenantIdentity>> {
    let values: Vec<(TenantField, Option<&String>)> = TenantField::ALL
        .iter()
        .map(|f| (*f, annotations.get(annotation_key(*f)).filter(|v| !v.is_empty())))
        .collect();

    let missing: Vec<TenantField> = values
        .iter()
        .filter(|(_, v)| v.is_none())
        .map(|(f, _)| *f)
        .collect();

    if missing.len() == TenantField::ALL.len() {
        return Ok(None);
    }
    if !missing.is_empty() {
        return Err(DecodeError::MissingFields {
            source_kind: "annotations",
            missing,
        }
        .into());
    }

    for (field, value) in &values {
        if let Some(value) = value {
            validate_field(*field, value).map_err(|e| DecodeError::Malformed {
                source_kind: "annotations",
                field: *field,
                reason: e.to_string(),
            })?;
        }
    }

    let field_value = |f: TenantField| {
        annotations
            .get(annotation_key(f))
            .cloned()
            .unwrap_or_default()
    };
    TenantIdentity::new(
        field_value(TenantField::Tenant),
        field_value(TenantField::Workspace),
        field_value(TenantField::Cluster),
    )
    .map(Some)
}

/// Remove the reserved keys, returning what was there.
pub fn strip(annotations: &mut Annotations) -> Annotations {
    let mut removed = Annotations::new();
    for field in TenantField::ALL {
        let key = annotation_key(field);
        if let Some(value) = annotations.remove(key) {
            removed.insert(key.to_string(), value);
        }
    }
    removed
}
