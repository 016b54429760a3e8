//! Outbound impersonation.
//!
//! Calls this process makes to shared downstream services are rewritten to
//! impersonate an administrative principal, with the tenant triple attached
//! as extra-info headers. The downstream side recovers the triple with
//! [`impersonated_principal`] without re-authenticating the original caller.
//! A transport bound to the global administrator, or not bound at all,
//! sends requests untouched.

use crate::principal::{tenant_from_extra, UserInfo};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tenantry_core::annotations::annotation_key;
use tenantry_core::{
    DecodeError, RequestScope, TenancyError, TenancyResult, TenantField, TenantIdentity,
};
use tenantry_storage::Rescope;
use tracing::debug;

pub const IMPERSONATE_USER_HEADER: &str = "impersonate-user";
pub const IMPERSONATE_GROUP_HEADER: &str = "impersonate-group";
pub const IMPERSONATE_EXTRA_PREFIX: &str = "impersonate-extra-";

const SOURCE: &str = "impersonation headers";

/// Header name carrying the extension field `key`.
pub fn extra_header_name(key: &str) -> TenancyResult<HeaderName> {
    let name = format!("{}{}", IMPERSONATE_EXTRA_PREFIX, urlencoding::encode(key));
    HeaderName::try_from(name.to_ascii_lowercase()).map_err(|e| {
        DecodeError::InvalidCredential {
            reason: format!("cannot encode extra key {:?}: {}", key, e),
        }
        .into()
    })
}

/// A request leaving this process.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Shared, tenant-unaware transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> TenancyResult<OutboundResponse>;
}

/// Network transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with the configured outbound timeout.
    pub fn with_timeout(timeout: std::time::Duration) -> TenancyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TenancyError::external("outbound-transport", e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: OutboundRequest) -> TenancyResult<OutboundResponse> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| TenancyError::external("outbound-transport", e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TenancyError::external("outbound-transport", e.to_string()))?;
        Ok(OutboundResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Transport wrapper that impersonates the administrator on behalf of a tenant.
#[derive(Clone)]
pub struct ImpersonatingTransport {
    inner: Arc<dyn Transport>,
    admin_user: String,
    scope: RequestScope,
    global_admin: TenantIdentity,
}

impl std::fmt::Debug for ImpersonatingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpersonatingTransport")
            .field("admin_user", &self.admin_user)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ImpersonatingTransport {
    pub fn new(inner: Arc<dyn Transport>, admin_user: impl Into<String>) -> Self {
        Self {
            inner,
            admin_user: admin_user.into(),
            scope: RequestScope::Unscoped,
            global_admin: TenantIdentity::global_admin(),
        }
    }

    /// Treat `identity` as the global administrator when re-scoping, so
    /// calls bound to it are sent without impersonation.
    pub fn with_global_admin(mut self, identity: TenantIdentity) -> Self {
        self.global_admin = identity;
        self
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Apply the impersonation headers for the bound tenant.
    ///
    /// Client-supplied impersonation headers are always dropped first so a
    /// caller cannot smuggle a different identity through.
    pub fn rewrite(&self, headers: &mut HeaderMap) -> TenancyResult<()> {
        let RequestScope::Tenant(tenant) = &self.scope else {
            return Ok(());
        };
        strip_impersonation(headers);
        headers.insert(
            HeaderName::from_static(IMPERSONATE_USER_HEADER),
            header_value(&self.admin_user)?,
        );
        for field in TenantField::ALL {
            headers.insert(
                extra_header_name(annotation_key(field))?,
                header_value(tenant.field(field))?,
            );
        }
        Ok(())
    }

    pub async fn send(&self, mut request: OutboundRequest) -> TenancyResult<OutboundResponse> {
        self.rewrite(&mut request.headers)?;
        debug!(method = %request.method, url = %request.url, scope = ?self.scope, "Outbound call");
        self.inner.send(request).await
    }
}

impl Rescope for ImpersonatingTransport {
    fn rescope(&self, tenant: &TenantIdentity) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            admin_user: self.admin_user.clone(),
            scope: RequestScope::resolve(Some(tenant.clone()), &self.global_admin),
            global_admin: self.global_admin.clone(),
        }
    }

    fn bound_tenant(&self) -> Option<&TenantIdentity> {
        self.scope.tenant()
    }
}

fn header_value(value: &str) -> TenancyResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        DecodeError::InvalidCredential {
            reason: format!("value not representable as a header: {}", e),
        }
        .into()
    })
}

fn strip_impersonation(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|n| n.as_str().starts_with("impersonate-"))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}

/// Whether any impersonation header is present.
pub fn has_impersonation(headers: &HeaderMap) -> bool {
    headers.keys().any(|n| n.as_str().starts_with("impersonate-"))
}

/// Principal requested through impersonation headers, `None` when there
/// is no `Impersonate-User` header.
pub fn impersonated_principal(headers: &HeaderMap) -> TenancyResult<Option<UserInfo>> {
    let Some(user) = headers.get(IMPERSONATE_USER_HEADER) else {
        return Ok(None);
    };
    let mut principal = UserInfo::new(text(user)?);
    for group in headers.get_all(IMPERSONATE_GROUP_HEADER) {
        principal.groups.push(text(group)?);
    }

    let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let Some(encoded) = name.as_str().strip_prefix(IMPERSONATE_EXTRA_PREFIX) else {
            continue;
        };
        let key = urlencoding::decode(encoded)
            .map_err(|_| malformed("extra header key is not valid UTF-8"))?
            .into_owned();
        extra.entry(key).or_default().push(text(value)?);
    }
    principal.extra = extra;
    Ok(Some(principal))
}

/// Tenant carried by impersonation headers.
pub fn tenant_from_impersonation_headers(
    headers: &HeaderMap,
) -> TenancyResult<Option<TenantIdentity>> {
    match impersonated_principal(headers)? {
        Some(principal) => tenant_from_extra(&principal),
        None => Ok(None),
    }
}

fn text(value: &HeaderValue) -> TenancyResult<String> {
    value
        .to_str()
        .map(str::to_string)
        .map_err(|_| malformed("header value is not visible ASCII"))
}

fn malformed(reason: &str) -> TenancyError {
    DecodeError::InvalidCredential {
        reason: format!("{}: {}", SOURCE, reason),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        seen: Mutex<Vec<HeaderMap>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, request: OutboundRequest) -> TenancyResult<OutboundResponse> {
            self.seen
                .lock()
                .map_err(|_| TenancyError::external("recorder", "poisoned"))?
                .push(request.headers);
            Ok(OutboundResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Vec::new(),
            })
        }
    }

    fn t1() -> TenantIdentity {
        TenantIdentity::new("t1", "w1", "c1").expect("valid identity")
    }

    fn transport() -> (Arc<RecordingTransport>, ImpersonatingTransport) {
        let recorder = Arc::new(RecordingTransport::default());
        let inner: Arc<dyn Transport> = recorder.clone();
        (recorder, ImpersonatingTransport::new(inner, "system:admin"))
    }

    fn last_headers(recorder: &RecordingTransport) -> HeaderMap {
        recorder
            .seen
            .lock()
            .expect("recorder lock")
            .last()
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    fn test_extra_header_name_escapes_slash() -> TenancyResult<()> {
        let name = extra_header_name("multitenancy.io/tenant")?;
        assert_eq!(name.as_str(), "impersonate-extra-multitenancy.io%2ftenant");
        Ok(())
    }

    #[tokio::test]
    async fn test_tenant_call_is_rewritten_and_decodable() -> TenancyResult<()> {
        let (recorder, root) = transport();
        let scoped = root.rescope(&t1());
        let mut request = OutboundRequest::new(Method::GET, "http://shared.local/api");
        request
            .headers
            .insert(IMPERSONATE_USER_HEADER, HeaderValue::from_static("mallory"));
        scoped.send(request).await?;

        let headers = last_headers(&recorder);
        assert_eq!(
            headers.get(IMPERSONATE_USER_HEADER).and_then(|v| v.to_str().ok()),
            Some("system:admin")
        );
        assert_eq!(tenant_from_impersonation_headers(&headers)?, Some(t1()));
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_and_root_pass_through() -> TenancyResult<()> {
        let (recorder, root) = transport();
        root.send(OutboundRequest::new(Method::GET, "http://shared.local")).await?;
        assert!(!has_impersonation(&last_headers(&recorder)));

        let admin = root.rescope(&TenantIdentity::global_admin());
        assert!(admin.bound_tenant().is_none());
        admin
            .send(OutboundRequest::new(Method::GET, "http://shared.local"))
            .await?;
        assert!(!has_impersonation(&last_headers(&recorder)));
        Ok(())
    }

    #[tokio::test]
    async fn test_configured_admin_passes_through() -> TenancyResult<()> {
        let ops = TenantIdentity::new("system", "ops", "all").expect("valid identity");
        let (recorder, root) = transport();
        let admin = root.with_global_admin(ops.clone()).rescope(&ops);
        assert_eq!(admin.scope(), &RequestScope::GlobalAdmin);
        admin
            .send(OutboundRequest::new(Method::GET, "http://shared.local"))
            .await?;
        assert!(!has_impersonation(&last_headers(&recorder)));
        Ok(())
    }

    async fn echo_server() -> Result<std::net::SocketAddr, std::io::Error> {
        use axum::{routing::post, Router};

        let app = Router::new().route(
            "/echo",
            post(|headers: HeaderMap, body: String| async move {
                let user = headers
                    .get(IMPERSONATE_USER_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                (StatusCode::ACCEPTED, [("x-seen-user", user)], body)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(addr)
    }

    #[tokio::test]
    async fn test_reqwest_transport_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let addr = echo_server().await?;
        let inner: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::with_timeout(std::time::Duration::from_secs(5))?);
        let scoped = ImpersonatingTransport::new(inner, "system:admin").rescope(&t1());

        let request = OutboundRequest::new(Method::POST, format!("http://{}/echo", addr))
            .with_body("payload");
        let response = scoped.send(request).await?;
        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(response.body, b"payload".to_vec());
        assert_eq!(
            response.headers.get("x-seen-user").and_then(|v| v.to_str().ok()),
            Some("system:admin")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reqwest_transport_unreachable_is_external() -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let transport = ReqwestTransport::with_timeout(std::time::Duration::from_secs(2))?;
        let err = transport
            .send(OutboundRequest::new(Method::GET, format!("http://{}/", addr)))
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::External { .. }));
        assert!(err.is_retryable());
        Ok(())
    }

    #[test]
    fn test_rescope_is_idempotent() -> TenancyResult<()> {
        let (_, root) = transport();
        let once = root.rescope(&t1());
        let twice = once.rescope(&t1());
        let mut a = HeaderMap::new();
        let mut b = HeaderMap::new();
        once.rewrite(&mut a)?;
        twice.rewrite(&mut b)?;
        assert_eq!(a, b);
        assert!(root.bound_tenant().is_none());
        Ok(())
    }

    #[test]
    fn test_partial_extra_headers_fail() -> TenancyResult<()> {
        let mut headers = HeaderMap::new();
        headers.insert(IMPERSONATE_USER_HEADER, HeaderValue::from_static("system:admin"));
        headers.insert(
            extra_header_name("multitenancy.io/tenant")?,
            HeaderValue::from_static("t1"),
        );
        let err = tenant_from_impersonation_headers(&headers).unwrap_err();
        assert!(matches!(err, TenancyError::Decode(DecodeError::MissingFields { .. })));
        Ok(())
    }

    #[test]
    fn test_no_impersonation() -> TenancyResult<()> {
        assert_eq!(tenant_from_impersonation_headers(&HeaderMap::new())?, None);
        Ok(())
    }
}
