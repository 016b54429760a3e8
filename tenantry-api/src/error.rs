//! HTTP error surface.
//!
//! Every rejection leaves the server as a JSON [`ApiError`]. The tenancy
//! failure families map onto status codes in one place, the
//! `From<TenancyError>` impl below.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tenantry_core::{StorageError, TenancyError};

/// Machine-readable rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 401
    Unauthenticated,
    /// Credential carried missing or malformed tenant info.
    InvalidTenantInfo,
    InvalidToken,
    TokenExpired,

    // 403
    Forbidden,
    /// Tenant-scoped operation attempted without a tenant.
    ScopeViolation,
    /// Refused by tenancy policy: admin point reads, disallowed resources,
    /// reserved-annotation tampering.
    PolicyRejected,

    // 400 / 404 / 409
    InvalidRequest,
    NotFound,
    AlreadyExists,
    Conflict,

    // 500 / 503
    Internal,
    DependencyUnavailable,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        use ErrorCode::*;
        match self {
            Unauthenticated | InvalidTenantInfo | InvalidToken | TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            Forbidden | ScopeViolation | PolicyRejected => StatusCode::FORBIDDEN,
            InvalidRequest => StatusCode::BAD_REQUEST,
            NotFound => StatusCode::NOT_FOUND,
            AlreadyExists | Conflict => StatusCode::CONFLICT,
            Internal => StatusCode::INTERNAL_SERVER_ERROR,
            DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message used when the caller must not see the underlying cause.
    fn generic_message(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            Unauthenticated => "authentication required",
            InvalidTenantInfo => "credential carries invalid tenant information",
            InvalidToken => "invalid service-account token",
            TokenExpired => "service-account token has expired",
            Forbidden => "forbidden",
            ScopeViolation => "operation requires a tenant",
            PolicyRejected => "rejected by tenancy policy",
            InvalidRequest => "invalid request",
            NotFound => "not found",
            AlreadyExists => "already exists",
            Conflict => "conflicting modification",
            Internal => "internal error",
            DependencyUnavailable => "dependency unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Structured context, e.g. the rejected resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn opaque(code: ErrorCode) -> Self {
        Self::new(code, code.generic_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn token_expired() -> Self {
        Self::opaque(ErrorCode::TokenExpired)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

/// Decode failures are 401, scope violations and policy rejections 403.
/// Composition defects are 500 and never leak their details to the client.
///
/// Scope violations and policy rejections are counted here, where they leave
/// the request. Decode failures are counted by the middleware that knows
/// which credential boundary produced them.
impl From<TenancyError> for ApiError {
    fn from(err: TenancyError) -> Self {
        if matches!(err, TenancyError::Scope(_) | TenancyError::Policy(_)) {
            crate::telemetry::record_error("request", &err);
        }
        match &err {
            TenancyError::Decode(e) => Self::new(ErrorCode::InvalidTenantInfo, e.to_string()),
            TenancyError::Scope(e) => Self::new(ErrorCode::ScopeViolation, e.to_string()),
            TenancyError::Policy(e) => Self::new(ErrorCode::PolicyRejected, e.to_string()),
            TenancyError::Validation(e) => Self::validation_failed(e.to_string()),
            TenancyError::Storage(StorageError::NotFound { key }) => {
                Self::new(ErrorCode::NotFound, format!("{} not found", key))
            }
            TenancyError::Storage(StorageError::AlreadyExists { key }) => {
                Self::new(ErrorCode::AlreadyExists, format!("{} already exists", key))
            }
            TenancyError::Storage(e @ StorageError::Conflict { .. }) => {
                Self::new(ErrorCode::Conflict, e.to_string())
            }
            TenancyError::External { .. } => {
                tracing::warn!(error = %err, "External dependency failed");
                Self::new(ErrorCode::DependencyUnavailable, err.to_string())
            }
            TenancyError::Composition(_) | TenancyError::Storage(_) | TenancyError::Config(_) => {
                tracing::error!(error = %err, "Internal tenancy error");
                Self::opaque(ErrorCode::Internal)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::{
        CompositionError, DecodeError, PolicyError, ScopeError, TenantField, ValidationError,
    };

    fn status(err: impl Into<TenancyError>) -> (ErrorCode, StatusCode, String) {
        let api = ApiError::from(err.into());
        (api.code, api.status_code(), api.message)
    }

    #[test]
    fn test_tenancy_error_mapping() {
        let (code, http, message) = status(DecodeError::MissingFields {
            source_kind: "user extra",
            missing: vec![TenantField::Cluster],
        });
        assert_eq!((code, http), (ErrorCode::InvalidTenantInfo, StatusCode::UNAUTHORIZED));
        assert!(message.contains("cluster"));

        let (code, http, _) = status(ScopeError::MissingTenant {
            operation: "get".into(),
        });
        assert_eq!((code, http), (ErrorCode::ScopeViolation, StatusCode::FORBIDDEN));

        let (code, http, _) = status(PolicyError::AdminPointOperation {
            operation: "get".into(),
        });
        assert_eq!((code, http), (ErrorCode::PolicyRejected, StatusCode::FORBIDDEN));

        let (_, http, _) = status(ValidationError::RequiredFieldMissing {
            field: "namespace".into(),
        });
        assert_eq!(http, StatusCode::BAD_REQUEST);

        let (_, http, _) = status(StorageError::NotFound { key: "k".into() });
        assert_eq!(http, StatusCode::NOT_FOUND);

        let (_, http, _) = status(StorageError::AlreadyExists { key: "k".into() });
        assert_eq!(http, StatusCode::CONFLICT);

        let (_, http, message) = status(CompositionError::CapabilityMissing {
            collaborator: "legacy".into(),
        });
        assert_eq!(http, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("legacy"));

        let (_, http, _) = status(TenancyError::external("secret-lookup", "timeout"));
        assert_eq!(http, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_conversion_counts_scope_violations() -> Result<(), String> {
        let metrics = crate::telemetry::METRICS
            .as_ref()
            .map_err(|e| e.message.clone())?;
        let before = metrics.scope_violations_total.get();
        let api = ApiError::from(TenancyError::from(ScopeError::MissingTenant {
            operation: "list namespaced objects".into(),
        }));
        assert_eq!(api.code, ErrorCode::ScopeViolation);
        assert!(metrics.scope_violations_total.get() >= before + 1.0);

        let admin_before = metrics
            .policy_rejections_total
            .with_label_values(&["admin_point_operation"])
            .get();
        let api = ApiError::from(TenancyError::from(PolicyError::AdminPointOperation {
            operation: "get".into(),
        }));
        assert_eq!(api.code, ErrorCode::PolicyRejected);
        assert!(
            metrics
                .policy_rejections_total
                .with_label_values(&["admin_point_operation"])
                .get()
                >= admin_before + 1.0
        );
        Ok(())
    }

    #[test]
    fn test_json_body() -> Result<(), serde_json::Error> {
        let err = ApiError::forbidden("nope").with_details(serde_json::json!({"resource": "nodes"}));
        let json = serde_json::to_string(&err)?;
        assert!(json.contains("\"FORBIDDEN\""));
        let back: ApiError = serde_json::from_str(&json)?;
        assert_eq!(back, err);

        let bare = serde_json::to_string(&ApiError::token_expired())?;
        assert!(!bare.contains("details"));
        Ok(())
    }

    #[test]
    fn test_display() {
        assert_eq!(ApiError::internal_error("boom").to_string(), "[Internal] boom");
    }
}
