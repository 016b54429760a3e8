//! Middleware modules for the tenantry API
//!
//! # Middleware Order
//!
//! The allow-list reads the [`AuthContext`](crate::auth::AuthContext) the
//! authentication layer inserts, so it must sit inside it:
//!
//! ```ignore
//! Router::new()
//!     .route("/api/v1/namespaces/:ns/pods", get(handler))
//!     // Innermost (runs last on request)
//!     .layer(middleware::from_fn_with_state(state.clone(), allow_list_middleware))
//!     .layer(middleware::from_fn_with_state(state, tenant_auth_middleware))
//!     // Outermost
//! ```

mod auth;

pub use auth::{
    allow_list_middleware, extract_auth_context, protect, tenant_auth_middleware, AuthExtractor,
    AuthMiddlewareError, TenantAuthState, CLIENT_CERT_SUBJECT_HEADER,
};
