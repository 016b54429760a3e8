//! Authentication Module
//!
//! Signed-claim encoding of the tenant triple. Service-account tokens carry
//! the triple as three custom claims (named like the reserved annotation
//! keys) next to the service-identity claims. Validation checks the
//! signature, then claim times against an injected clock, then asks a
//! [`CredentialLookup`] whether the issuing account and its secret still
//! exist.

use crate::error::{ApiError, ApiResult};
use crate::principal::{attach_tenant, UserInfo};
use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tenantry_core::{
    ConfigError, DecodeError, RequestScope, TenancyError, TenancyResult, TenantField,
    TenantIdentity,
};

/// Issuer written into and required from service-account tokens.
pub const SERVICE_ACCOUNT_ISSUER: &str = "tenantry/serviceaccount";

const DEVELOPMENT_SECRET: &str = "tenantry-development-signing-secret";
const MIN_PRODUCTION_SECRET_LEN: usize = 32;
const DEFAULT_ADMIN_USER: &str = "system:admin";

/// Time source for claim checks. Injected so token tests are deterministic.
pub trait TokenClock: Send + Sync {
    /// Unix seconds. A broken clock may report a negative value.
    fn unix_now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TokenClock for SystemClock {
    fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl TokenClock for FixedClock {
    fn unix_now(&self) -> i64 {
        self.0
    }
}


/// HMAC key for service-account tokens. Redacted in `Debug`.
#[derive(Clone)]
pub struct SigningSecret(SecretString);

impl SigningSecret {
    pub fn new(secret: String) -> TenancyResult<Self> {
        if secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "signing_secret".to_string(),
            }
            .into());
        }
        Ok(Self(secret.into()))
    }

    /// Development fallback used when no secret is configured.
    fn development() -> Self {
        Self(SecretString::from(DEVELOPMENT_SECRET.to_string()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn is_development_default(&self) -> bool {
        self.expose() == DEVELOPMENT_SECRET
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Token, certificate-header and impersonation settings.
#[derive(Clone)]
pub struct AuthConfig {
    pub signing_secret: SigningSecret,
    /// HMAC family only; defaults to HS256.
    pub algorithm: Algorithm,
    /// Lifetime of minted tokens.
    pub token_ttl_secs: i64,
    /// Tolerance applied to `exp` and `nbf`.
    pub leeway_secs: i64,
    /// Accept the subject forwarded by a trusted TLS terminator.
    pub trust_certificate_header: bool,
    /// The one principal whose inbound impersonation headers are honored.
    /// Outbound calls also authenticate as this principal.
    pub admin_user: String,
    pub clock: Arc<dyn TokenClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("algorithm", &self.algorithm)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("trust_certificate_header", &self.trust_certificate_header)
            .field("admin_user", &self.admin_user)
            .finish_non_exhaustive()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let signing_secret = std::env::var("TENANTRY_SIGNING_SECRET")
            .ok()
            .and_then(|s| SigningSecret::new(s).ok())
            .unwrap_or_else(SigningSecret::development);
        Self {
            signing_secret,
            algorithm: Algorithm::HS256,
            token_ttl_secs: 3600,
            leeway_secs: 60,
            trust_certificate_header: false,
            admin_user: DEFAULT_ADMIN_USER.to_string(),
            clock: Arc::new(SystemClock),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl AuthConfig {
    /// Environment overrides on top of [`AuthConfig::default`]:
    /// `TENANTRY_SIGNING_SECRET`, `TENANTRY_TOKEN_TTL_SECS`,
    /// `TENANTRY_TOKEN_LEEWAY_SECS`, `TENANTRY_TRUST_CERT_HEADER` and
    /// `TENANTRY_ADMIN_USER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ttl) = env_parse("TENANTRY_TOKEN_TTL_SECS") {
            config.token_ttl_secs = ttl;
        }
        if let Some(leeway) = env_parse("TENANTRY_TOKEN_LEEWAY_SECS") {
            config.leeway_secs = leeway;
        }
        if let Some(trust) = env_parse("TENANTRY_TRUST_CERT_HEADER") {
            config.trust_certificate_header = trust;
        }
        if let Some(admin) = std::env::var("TENANTRY_ADMIN_USER")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            config.admin_user = admin;
        }
        config
    }

    /// Refuse to run a production deployment on the development secret or
    /// a short one. Outside production these are warnings.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("TENANTRY_ENVIRONMENT")
            .unwrap_or_default()
            .to_ascii_lowercase();
        let production = matches!(environment.as_str(), "production" | "prod");

        let problem = if self.signing_secret.is_development_default() {
            Some("TENANTRY_SIGNING_SECRET is not set".to_string())
        } else if self.signing_secret.len() < MIN_PRODUCTION_SECRET_LEN {
            Some(format!(
                "signing secret has {} bytes, need at least {}",
                self.signing_secret.len(),
                MIN_PRODUCTION_SECRET_LEN
            ))
        } else {
            None
        };

        match problem {
            Some(problem) if production => Err(ApiError::validation_failed(problem)),
            Some(problem) => {
                tracing::warn!(%problem, "Weak token signing secret");
                Ok(())
            }
            None => {
                if production && self.trust_certificate_header {
                    tracing::warn!("Trusting forwarded certificate subjects; the TLS terminator must strip client-supplied copies");
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// SERVICE-ACCOUNT CLAIMS
// ============================================================================

/// Claims of a service-account token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountClaims {
    pub iss: String,
    /// `system:serviceaccount:<namespace>:<name>`
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    #[serde(rename = "serviceaccount/namespace")]
    pub namespace: String,
    #[serde(rename = "serviceaccount/name")]
    pub service_account_name: String,
    #[serde(rename = "serviceaccount/uid")]
    pub service_account_uid: String,
    #[serde(rename = "serviceaccount/secret.name")]
    pub secret_name: String,

    #[serde(rename = "multitenancy.io/tenant", default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(rename = "multitenancy.io/workspace", default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(rename = "multitenancy.io/cluster", default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl ServiceAccountClaims {
    pub fn new(
        namespace: &str,
        name: &str,
        uid: &str,
        secret_name: &str,
        tenant: Option<&TenantIdentity>,
        expiration_secs: i64,
        clock: &dyn TokenClock,
    ) -> Self {
        let now = clock.unix_now();
        Self {
            iss: SERVICE_ACCOUNT_ISSUER.to_string(),
            sub: service_account_username(namespace, name),
            iat: now,
            exp: now.saturating_add(expiration_secs),
            nbf: None,
            namespace: namespace.to_string(),
            service_account_name: name.to_string(),
            service_account_uid: uid.to_string(),
            secret_name: secret_name.to_string(),
            tenant: tenant.map(|t| t.tenant().to_string()),
            workspace: tenant.map(|t| t.workspace().to_string()),
            cluster: tenant.map(|t| t.cluster().to_string()),
        }
    }

    /// Decode the tenant claims; `None` when all three are absent.
    pub fn tenant_identity(&self) -> TenancyResult<Option<TenantIdentity>> {
        let values = [&self.tenant, &self.workspace, &self.cluster];
        let present = |v: &&Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if !values.iter().any(present) {
            return Ok(None);
        }
        let missing: Vec<TenantField> = TenantField::ALL
            .into_iter()
            .zip(values.iter())
            .filter(|(_, v)| !present(v))
            .map(|(f, _)| f)
            .collect();
        if !missing.is_empty() {
            return Err(DecodeError::MissingFields {
                source_kind: "token claims",
                missing,
            }
            .into());
        }
        TenantIdentity::new(
            self.tenant.clone().unwrap_or_default(),
            self.workspace.clone().unwrap_or_default(),
            self.cluster.clone().unwrap_or_default(),
        )
        .map(Some)
        .map_err(|e| {
            TenancyError::from(DecodeError::InvalidCredential {
                reason: format!("malformed tenant claims: {}", e),
            })
        })
    }
}

pub fn service_account_username(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{}:{}", namespace, name)
}

// ============================================================================
// CREDENTIAL LOOKUP
// ============================================================================

/// Stored service account, as seen by the credential lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountRecord {
    pub uid: String,
    /// Secret names currently referenced by the account.
    pub secrets: Vec<String>,
}

/// Existence and revocation checks for token-backed identities.
///
/// Implementations hit storage or the network. Results must not be cached
/// beyond a single request.
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn service_account(
        &self,
        tenant: Option<&TenantIdentity>,
        namespace: &str,
        name: &str,
    ) -> TenancyResult<Option<ServiceAccountRecord>>;

    /// Whether the token secret still exists.
    async fn secret_exists(
        &self,
        tenant: Option<&TenantIdentity>,
        namespace: &str,
        name: &str,
    ) -> TenancyResult<bool>;
}

/// Lookup backed by concurrent maps, for tests and single-process setups.
#[derive(Debug, Default)]
pub struct InMemoryCredentialLookup {
    accounts: DashMap<String, ServiceAccountRecord>,
    secrets: DashMap<String, ()>,
}

fn lookup_key(tenant: Option<&TenantIdentity>, namespace: &str, name: &str) -> String {
    match tenant {
        Some(t) => format!("{}/{}/{}", t, namespace, name),
        None => format!("{}/{}", namespace, name),
    }
}

impl InMemoryCredentialLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_service_account(
        &self,
        tenant: Option<&TenantIdentity>,
        namespace: &str,
        name: &str,
        record: ServiceAccountRecord,
    ) {
        for secret in &record.secrets {
            self.secrets.insert(lookup_key(tenant, namespace, secret), ());
        }
        self.accounts.insert(lookup_key(tenant, namespace, name), record);
    }

    /// Delete a secret, revoking every token minted from it.
    pub fn revoke_secret(&self, tenant: Option<&TenantIdentity>, namespace: &str, name: &str) {
        self.secrets.remove(&lookup_key(tenant, namespace, name));
    }
}

#[async_trait]
impl CredentialLookup for InMemoryCredentialLookup {
    async fn service_account(
        &self,
        tenant: Option<&TenantIdentity>,
        namespace: &str,
        name: &str,
    ) -> TenancyResult<Option<ServiceAccountRecord>> {
        Ok(self
            .accounts
            .get(&lookup_key(tenant, namespace, name))
            .map(|r| r.value().clone()))
    }

    async fn secret_exists(
        &self,
        tenant: Option<&TenantIdentity>,
        namespace: &str,
        name: &str,
    ) -> TenancyResult<bool> {
        Ok(self.secrets.contains_key(&lookup_key(tenant, namespace, name)))
    }
}

// ============================================================================
// AUTHENTICATION CONTEXT
// ============================================================================

/// How a request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ServiceAccountToken,
    CertificateSubject,
    Impersonation,
}

/// Authentication context injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Principal with the tenant triple attached as extension fields
    pub user: UserInfo,
    /// Resolved tenant scope of the call
    pub scope: RequestScope,
    pub method: AuthMethod,
}

impl AuthContext {
    pub fn new(user: UserInfo, scope: RequestScope, method: AuthMethod) -> Self {
        Self {
            user,
            scope,
            method,
        }
    }

    pub fn tenant(&self) -> Option<&TenantIdentity> {
        self.scope.tenant()
    }

    pub fn is_global_admin(&self) -> bool {
        matches!(self.scope, RequestScope::GlobalAdmin)
    }
}

// ============================================================================
// TOKEN FUNCTIONS
// ============================================================================

/// Validate claim times with our own clock and leeway.
fn validate_claim_times(now: i64, exp: i64, nbf: Option<i64>, leeway_secs: i64) -> ApiResult<()> {
    if let Some(nbf) = nbf {
        if now.saturating_add(leeway_secs) < nbf {
            return Err(ApiError::unauthorized("Token not yet valid (nbf)"));
        }
    }
    if exp < now.saturating_sub(leeway_secs) {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

pub fn generate_service_account_token(
    config: &AuthConfig,
    claims: &ServiceAccountClaims,
) -> ApiResult<String> {
    let encoding_key = EncodingKey::from_secret(config.signing_secret.expose().as_bytes());
    encode(&Header::new(config.algorithm), claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

/// Check signature, issuer and claim times. No existence checks.
pub fn validate_service_account_token(
    config: &AuthConfig,
    token: &str,
) -> ApiResult<ServiceAccountClaims> {
    let decoding_key = DecodingKey::from_secret(config.signing_secret.expose().as_bytes());

    // Signature only; times are checked against the injected clock below.
    let mut validation = Validation::new(config.algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

    let claims = decode::<ServiceAccountClaims>(token, &decoding_key, &validation)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                ApiError::invalid_token("Token signature is invalid")
            }
            _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
        })?
        .claims;

    let now = config.clock.unix_now();
    if now < 0 {
        tracing::error!(timestamp = now, "System clock returned pre-epoch time");
        return Err(ApiError::internal_error(
            "Server time configuration error - please contact support",
        ));
    }
    validate_claim_times(now, claims.exp, claims.nbf, config.leeway_secs)?;

    if claims.iss != SERVICE_ACCOUNT_ISSUER {
        return Err(ApiError::invalid_token("Token issuer is not trusted"));
    }
    if claims.sub != service_account_username(&claims.namespace, &claims.service_account_name) {
        return Err(ApiError::invalid_token("Token subject does not match service account"));
    }
    Ok(claims)
}

/// Full service-account authentication: token checks, tenant decoding and
/// the existence/revocation lookups.
pub async fn authenticate_service_account(
    config: &AuthConfig,
    lookup: &dyn CredentialLookup,
    token: &str,
) -> ApiResult<(UserInfo, Option<TenantIdentity>)> {
    let claims = validate_service_account_token(config, token)?;
    let tenant = claims.tenant_identity()?;

    let account = lookup
        .service_account(tenant.as_ref(), &claims.namespace, &claims.service_account_name)
        .await?
        .ok_or_else(|| ApiError::invalid_token("Service account no longer exists"))?;
    if account.uid != claims.service_account_uid {
        return Err(ApiError::invalid_token("Service account was recreated"));
    }
    if !account.secrets.iter().any(|s| s == &claims.secret_name)
        || !lookup
            .secret_exists(tenant.as_ref(), &claims.namespace, &claims.secret_name)
            .await?
    {
        tracing::info!(sub = %claims.sub, secret = %claims.secret_name, "Rejected revoked token");
        return Err(ApiError::invalid_token("Token has been revoked"));
    }

    let mut user = UserInfo::new(claims.sub.clone()).with_groups(vec![
        "system:serviceaccounts".to_string(),
        format!("system:serviceaccounts:{}", claims.namespace),
    ]);
    user.uid = claims.service_account_uid.clone();
    if let Some(t) = &tenant {
        attach_tenant(&mut user, t);
    }
    Ok((user, tenant))
}
