//! Certificate-subject encoding of the tenant triple.
//!
//! Client certificates carry the triple as prefixed organizational-unit
//! entries next to ordinary group memberships:
//!
//! ```text
//! CN=alice,OU=multitenancy:tenant:t1,OU=multitenancy:workspace:w1,OU=multitenancy:cluster:c1,OU=group-a
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tenantry_core::identity::validate_field;
use tenantry_core::{DecodeError, TenancyResult, TenantField, TenantIdentity};

pub const TENANT_OU_PREFIX: &str = "multitenancy:tenant:";
pub const WORKSPACE_OU_PREFIX: &str = "multitenancy:workspace:";
pub const CLUSTER_OU_PREFIX: &str = "multitenancy:cluster:";

const SOURCE: &str = "certificate subject";

fn ou_prefix(field: TenantField) -> &'static str {
    match field {
        TenantField::Tenant => TENANT_OU_PREFIX,
        TenantField::Workspace => WORKSPACE_OU_PREFIX,
        TenantField::Cluster => CLUSTER_OU_PREFIX,
    }
}

/// The subject fields this layer reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSubject {
    pub common_name: String,
    pub organizational_units: Vec<String>,
}

/// Result of decoding a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    pub user: String,
    pub groups: Vec<String>,
    pub tenant: Option<TenantIdentity>,
}

impl CertificateSubject {
    /// Parse an RFC 4514 distinguished name.
    ///
    /// Only `CN` and `OU` are kept; other attribute types are ignored.
    /// Escapes (`\,` and `\2C` style) are honored.
    pub fn parse(dn: &str) -> TenancyResult<Self> {
        let mut subject = Self::default();
        for rdn in split_unescaped(dn) {
            let rdn = rdn.trim();
            if rdn.is_empty() {
                continue;
            }
            let (attr, value) = rdn
                .split_once('=')
                .ok_or_else(|| invalid(format!("attribute without '=': {:?}", rdn)))?;
            let value = unescape(value.trim())?;
            match attr.trim().to_ascii_uppercase().as_str() {
                "CN" => {
                    if !subject.common_name.is_empty() {
                        return Err(invalid("multiple CN attributes"));
                    }
                    subject.common_name = value;
                }
                "OU" => subject.organizational_units.push(value),
                _ => {}
            }
        }
        Ok(subject)
    }
}

impl fmt::Display for CertificateSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CN={}", escape(&self.common_name))?;
        for ou in &self.organizational_units {
            write!(f, ",OU={}", escape(ou))?;
        }
        Ok(())
    }
}

/// Build the subject for a user, its groups and an optional tenant.
pub fn encode_subject(
    user: &str,
    groups: &[String],
    tenant: Option<&TenantIdentity>,
) -> CertificateSubject {
    let mut organizational_units = Vec::with_capacity(groups.len() + 3);
    if let Some(tenant) = tenant {
        for field in TenantField::ALL {
            organizational_units.push(format!("{}{}", ou_prefix(field), tenant.field(field)));
        }
    }
    organizational_units.extend(groups.iter().cloned());
    CertificateSubject {
        common_name: user.to_string(),
        organizational_units,
    }
}

/// Split subject entries into the tenant triple and plain groups.
///
/// A field repeated with the same value is accepted; repeated with
/// different values it is a decode failure.
pub fn decode_subject(subject: &CertificateSubject) -> TenancyResult<CertificateIdentity> {
    if subject.common_name.is_empty() {
        return Err(invalid("certificate subject has no common name"));
    }

    let mut found: [Option<&str>; 3] = [None, None, None];
    let mut groups = Vec::new();

    'entries: for entry in &subject.organizational_units {
        for (slot, field) in TenantField::ALL.into_iter().enumerate() {
            let Some(value) = entry.strip_prefix(ou_prefix(field)) else {
                continue;
            };
            match found[slot] {
                Some(existing) if existing != value => {
                    return Err(DecodeError::Conflicting {
                        source_kind: SOURCE,
                        field,
                    }
                    .into());
                }
                _ => found[slot] = Some(value),
            }
            continue 'entries;
        }
        groups.push(entry.clone());
    }

    let tenant = match found {
        [None, None, None] => None,
        [Some(t), Some(w), Some(c)] => {
            for (field, value) in TenantField::ALL.into_iter().zip([t, w, c]) {
                validate_field(field, value).map_err(|e| DecodeError::Malformed {
                    source_kind: SOURCE,
                    field,
                    reason: e.to_string(),
                })?;
            }
            Some(TenantIdentity::new(t, w, c)?)
        }
        partial => {
            let missing = TenantField::ALL
                .into_iter()
                .zip(partial)
                .filter(|(_, v)| v.is_none())
                .map(|(f, _)| f)
                .collect();
            return Err(DecodeError::MissingFields {
                source_kind: SOURCE,
                missing,
            }
            .into());
        }
    };

    Ok(CertificateIdentity {
        user: subject.common_name.clone(),
        groups,
        tenant,
    })
}

fn invalid(reason: impl Into<String>) -> tenantry_core::TenancyError {
    DecodeError::InvalidCredential {
        reason: reason.into(),
    }
    .into()
}

/// Split on `,` and `+` that are not escaped.
fn split_unescaped(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ',' | '+' => {
                parts.push(&dn[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&dn[start..]);
    parts
}

fn unescape(value: &str) -> TenancyResult<String> {
    let mut out = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let next = bytes
            .get(i + 1)
            .ok_or_else(|| invalid("dangling escape in subject"))?;
        let hex = bytes.get(i + 1..i + 3).and_then(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
        });
        match hex {
            Some(b) => {
                out.push(b);
                i += 3;
            }
            None => {
                out.push(*next);
                i += 2;
            }
        }
    }
    String::from_utf8(out).map_err(|_| invalid("subject is not valid UTF-8"))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let leading = i == 0 && (c == '#' || c == ' ');
        let trailing = i + 1 == value.chars().count() && c == ' ';
        if leading || trailing || matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::TenancyError;

    fn t1() -> TenantIdentity {
        TenantIdentity::new("t1", "w1", "c1").expect("valid identity")
    }

    #[test]
    fn test_decode_splits_tenant_and_groups() -> TenancyResult<()> {
        let subject = CertificateSubject {
            common_name: "alice".into(),
            organizational_units: vec![
                "multitenancy:tenant:t1".into(),
                "multitenancy:workspace:w1".into(),
                "multitenancy:cluster:c1".into(),
                "group-a".into(),
            ],
        };
        let identity = decode_subject(&subject)?;
        assert_eq!(identity.tenant, Some(t1()));
        assert_eq!(identity.groups, vec!["group-a".to_string()]);
        assert_eq!(identity.user, "alice");
        Ok(())
    }

    #[test]
    fn test_no_tenant_entries() -> TenancyResult<()> {
        let subject = encode_subject("system:node", &["system:nodes".into()], None);
        let identity = decode_subject(&subject)?;
        assert!(identity.tenant.is_none());
        assert_eq!(identity.groups.len(), 1);
        Ok(())
    }

    #[test]
    fn test_partial_and_conflicting() {
        let mut subject = encode_subject("alice", &[], Some(&t1()));
        subject.organizational_units.retain(|ou| !ou.starts_with(CLUSTER_OU_PREFIX));
        let err = decode_subject(&subject).unwrap_err();
        assert!(matches!(
            err,
            TenancyError::Decode(DecodeError::MissingFields { ref missing, .. }) if missing == &vec![TenantField::Cluster]
        ));

        let mut subject = encode_subject("alice", &[], Some(&t1()));
        subject.organizational_units.push("multitenancy:tenant:t2".into());
        assert!(matches!(
            decode_subject(&subject),
            Err(TenancyError::Decode(DecodeError::Conflicting { field: TenantField::Tenant, .. }))
        ));

        let mut subject = encode_subject("alice", &[], Some(&t1()));
        subject.organizational_units.push("multitenancy:tenant:t1".into());
        assert!(decode_subject(&subject).is_ok());
    }

    #[test]
    fn test_missing_common_name() {
        let subject = encode_subject("", &[], Some(&t1()));
        assert!(matches!(
            decode_subject(&subject),
            Err(TenancyError::Decode(DecodeError::InvalidCredential { .. }))
        ));
    }

    #[test]
    fn test_parse_and_display() -> TenancyResult<()> {
        let dn = "CN=alice,OU=multitenancy:tenant:t1,OU=multitenancy:workspace:w1,OU=multitenancy:cluster:c1,O=ignored,OU=team\\, a";
        let subject = CertificateSubject::parse(dn)?;
        assert_eq!(subject.common_name, "alice");
        assert_eq!(subject.organizational_units.len(), 4);
        assert_eq!(subject.organizational_units[3], "team, a");

        let reparsed = CertificateSubject::parse(&subject.to_string())?;
        assert_eq!(reparsed, subject);
        Ok(())
    }

    #[test]
    fn test_parse_hex_escape_and_errors() -> TenancyResult<()> {
        let subject = CertificateSubject::parse("CN=a\\2Cb")?;
        assert_eq!(subject.common_name, "a,b");
        assert!(CertificateSubject::parse("CN=a,CN=b").is_err());
        assert!(CertificateSubject::parse("garbage").is_err());
        assert!(CertificateSubject::parse("CN=a\\").is_err());
        Ok(())
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Parsing arbitrary input never panics.
        #[test]
        fn prop_parse_never_panics(input in ".{0,80}") {
            let _ = CertificateSubject::parse(&input);
        }

        /// Encoded subjects decode back to the same tenant and groups.
        #[test]
        fn prop_encode_decode(
            t in "[a-z0-9]{1,8}",
            groups in proptest::collection::vec("[a-z][a-z0-9-]{0,8}", 0..4),
        ) {
            let tenant = TenantIdentity::new(t, "w", "c").expect("valid");
            let subject = encode_subject("user", &groups, Some(&tenant));
            let decoded = decode_subject(&subject).expect("decode");
            prop_assert_eq!(decoded.tenant, Some(tenant));
            prop_assert_eq!(decoded.groups, groups);
        }
    }
}
