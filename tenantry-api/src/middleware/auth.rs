//! Axum Middleware for Tenant Authentication and Allow-Listing
//!
//! `tenant_auth_middleware` turns one of the three inbound credential forms
//! into an [`AuthContext`]:
//! - `Authorization: Bearer <service-account token>`
//! - a certificate subject forwarded by a trusted TLS terminator
//! - impersonation headers, honored only from the administrator principal
//!
//! `allow_list_middleware` then rejects tenants addressing resources outside
//! the allow-list. Both return JSON [`ApiError`] bodies.

use crate::auth::{authenticate_service_account, AuthContext, AuthMethod, CredentialLookup};
use crate::certificate::{decode_subject, CertificateSubject};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::gate::RequestInfo;
use crate::impersonation::{has_impersonation, impersonated_principal};
use crate::principal::{attach_tenant, tenant_from_extra, UserInfo};
use crate::telemetry::{record_decode_failure, record_error};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use tenantry_core::{TenancyResult, TenantIdentity};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Header carrying the client certificate subject, set by the TLS terminator.
pub const CLIENT_CERT_SUBJECT_HEADER: &str = "x-client-cert-subject";

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

#[derive(Clone)]
pub struct TenantAuthState {
    pub config: Arc<ApiConfig>,
    pub lookup: Arc<dyn CredentialLookup>,
}

impl std::fmt::Debug for TenantAuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantAuthState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TenantAuthState {
    pub fn new(config: ApiConfig, lookup: Arc<dyn CredentialLookup>) -> Self {
        Self {
            config: Arc::new(config),
            lookup,
        }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTIONS
// ============================================================================

pub async fn tenant_auth_middleware(
    State(state): State<TenantAuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let (user, tenant, method) = authenticate_headers(&state, request.headers()).await?;
    let (user, tenant, method) = apply_impersonation(&state, request.headers(), user, tenant, method)?;

    let scope = state.config.tenancy.scope_for(tenant);
    debug!(user = %user.name, scope = ?scope, method = ?method, "Request authenticated");
    request
        .extensions_mut()
        .insert(AuthContext::new(user, scope, method));
    Ok(next.run(request).await)
}

async fn authenticate_headers(
    state: &TenantAuthState,
    headers: &HeaderMap,
) -> ApiResult<(UserInfo, Option<TenantIdentity>, AuthMethod)> {
    if let Some(auth_value) = headers.get("authorization").and_then(|h| h.to_str().ok()) {
        let token = auth_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::invalid_token("Authorization header must use Bearer scheme"))?;
        let (user, tenant) = authenticate_service_account(&state.config.auth, &*state.lookup, token)
            .await
            .inspect_err(|e| {
                if e.code == ErrorCode::InvalidTenantInfo {
                    record_decode_failure("service_account_token");
                }
            })?;
        return Ok((user, tenant, AuthMethod::ServiceAccountToken));
    }

    if state.config.auth.trust_certificate_header {
        if let Some(raw) = headers.get(CLIENT_CERT_SUBJECT_HEADER) {
            let raw = raw
                .to_str()
                .map_err(|_| ApiError::unauthorized("Certificate subject header is not ASCII"))?;
            let identity = CertificateSubject::parse(raw)
                .and_then(|subject| decode_subject(&subject))
                .inspect_err(|e| record_error("certificate_subject", e))?;
            let mut user = UserInfo::new(identity.user).with_groups(identity.groups);
            if let Some(tenant) = &identity.tenant {
                attach_tenant(&mut user, tenant);
            }
            return Ok((user, identity.tenant, AuthMethod::CertificateSubject));
        }
    }

    Err(ApiError::unauthorized(
        "Authentication required: provide a bearer token or client certificate",
    ))
}

/// Swap in the impersonated principal when the caller is the administrator.
fn apply_impersonation(
    state: &TenantAuthState,
    headers: &HeaderMap,
    user: UserInfo,
    tenant: Option<TenantIdentity>,
    method: AuthMethod,
) -> ApiResult<(UserInfo, Option<TenantIdentity>, AuthMethod)> {
    if !has_impersonation(headers) {
        return Ok((user, tenant, method));
    }
    if user.name != state.config.auth.admin_user {
        warn!(user = %user.name, "Impersonation attempted by non-administrator");
        return Err(ApiError::forbidden("Impersonation is restricted to the administrator"));
    }
    let decoded: TenancyResult<_> = impersonated_principal(headers).and_then(|principal| {
        let principal = principal.ok_or_else(|| {
            tenantry_core::DecodeError::InvalidCredential {
                reason: "impersonation headers without Impersonate-User".to_string(),
            }
        })?;
        let tenant = tenant_from_extra(&principal)?;
        Ok((principal, tenant))
    });
    let (principal, tenant) = decoded.inspect_err(|e| record_error("impersonation", e))?;
    Ok((principal, tenant, AuthMethod::Impersonation))
}

/// Reject tenants addressing resources outside the allow-list.
///
/// Must run inside `tenant_auth_middleware`.
pub async fn allow_list_middleware(
    State(state): State<TenantAuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let info = RequestInfo::parse(request.method(), request.uri().path());
    let auth = extract_auth_context(&request)?;
    state.config.allow_list.authorize(auth, &info)?;
    request.extensions_mut().insert(info);
    Ok(next.run(request).await)
}

/// Wrap `router` with request tracing, the in-flight cap, authentication
/// and the allow-list, in that order from the outside in.
pub fn protect(router: Router, state: TenantAuthState) -> Router {
    let limit = state.config.max_concurrent_requests;
    router
        .layer(axum_middleware::from_fn_with_state(state.clone(), allow_list_middleware))
        .layer(axum_middleware::from_fn_with_state(state, tenant_auth_middleware))
        .layer(GlobalConcurrencyLimitLayer::new(limit))
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl From<ApiError> for AuthMiddlewareError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl From<tenantry_core::TenancyError> for AuthMiddlewareError {
    fn from(err: tenantry_core::TenancyError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed Axum extractor for the authentication context.
///
/// `tenant_auth_middleware` must be applied to the route; otherwise the
/// extractor fails with 500.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "AuthContext not found in request extensions. \
                     Ensure tenant_auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub fn extract_auth_context(request: &Request) -> ApiResult<&AuthContext> {
    request
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(|| ApiError::unauthorized("Auth context missing from request"))
}
