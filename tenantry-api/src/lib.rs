//! Tenantry API - Trust Boundaries and HTTP Surface
//!
//! Decodes the tenant triple from the three inbound credential forms,
//! impersonates on outbound calls, enforces the resource allow-list and
//! composes the per-request tenant collaborators behind axum middleware.

pub mod auth;
pub mod certificate;
pub mod config;
pub mod error;
pub mod gate;
pub mod impersonation;
pub mod middleware;
pub mod principal;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{
    authenticate_service_account, generate_service_account_token,
    validate_service_account_token, AuthConfig, AuthContext, AuthMethod, CredentialLookup,
    FixedClock, InMemoryCredentialLookup, TokenClock, SigningSecret, ServiceAccountClaims,
    ServiceAccountRecord, SystemClock,
};
pub use certificate::{decode_subject, encode_subject, CertificateIdentity, CertificateSubject};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use gate::{RequestInfo, ResourceAllowList};
pub use impersonation::{
    impersonated_principal, tenant_from_impersonation_headers, ImpersonatingTransport,
    OutboundRequest, OutboundResponse, ReqwestTransport, Transport,
};
pub use middleware::{
    allow_list_middleware, protect, tenant_auth_middleware, AuthExtractor, TenantAuthState,
};
pub use principal::{attach_tenant, detach_tenant, tenant_from_extra, UserInfo};
pub use services::TenantServices;
