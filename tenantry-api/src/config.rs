//! API Configuration Module
//!
//! Bundles the tenancy, authentication and allow-list settings the HTTP
//! surface needs. Loaded from environment variables with defaults suitable
//! for development.

use crate::auth::AuthConfig;
use crate::error::{ApiError, ApiResult};
use crate::gate::ResourceAllowList;
use std::time::Duration;
use tenantry_core::TenancyConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Key prefix and global-administrator identity
    pub tenancy: TenancyConfig,

    /// Token, certificate and impersonation settings
    pub auth: AuthConfig,

    /// Resources ordinary tenants may address
    pub allow_list: ResourceAllowList,

    /// Upper bound on in-flight requests handled by one router.
    pub max_concurrent_requests: usize,

    /// Timeout applied to outbound impersonated calls.
    pub outbound_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            tenancy: TenancyConfig::default(),
            auth: AuthConfig::default(),
            allow_list: ResourceAllowList::default(),
            max_concurrent_requests: 1024,
            outbound_timeout: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables, beyond those read by [`TenancyConfig::from_env`],
    /// [`AuthConfig::from_env`] and [`ResourceAllowList::from_env`]:
    /// - `TENANTRY_MAX_CONCURRENT_REQUESTS`: in-flight request cap (default: 1024)
    /// - `TENANTRY_OUTBOUND_TIMEOUT_SECS`: outbound call timeout (default: 30)
    pub fn from_env() -> ApiResult<Self> {
        let max_concurrent_requests = std::env::var("TENANTRY_MAX_CONCURRENT_REQUESTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1024);

        let outbound_timeout = std::env::var("TENANTRY_OUTBOUND_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            tenancy: TenancyConfig::from_env()?,
            auth: AuthConfig::from_env(),
            allow_list: ResourceAllowList::from_env()?,
            max_concurrent_requests,
            outbound_timeout,
        })
    }

    /// Production checks, delegated to each section.
    pub fn validate(&self) -> ApiResult<()> {
        self.auth.validate_for_production()?;
        if self.allow_list.resources.is_empty() {
            tracing::warn!("Resource allow-list is empty; ordinary tenants cannot address any resource");
        }
        if self.outbound_timeout.is_zero() {
            return Err(ApiError::validation_failed("outbound timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let previous = std::env::var(key).ok();
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.previous.as_deref() {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_from_env_defaults() -> ApiResult<()> {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _a = EnvVarGuard::set("TENANTRY_MAX_CONCURRENT_REQUESTS", None);
        let _b = EnvVarGuard::set("TENANTRY_ALLOW_LIST_PATH", None);
        let _c = EnvVarGuard::set("TENANTRY_KEY_PREFIX", None);
        let config = ApiConfig::from_env()?;
        assert_eq!(config.max_concurrent_requests, 1024);
        assert!(config.allow_list.contains("", "pods"));
        assert_eq!(config.tenancy.key_prefix, "/registry");
        Ok(())
    }

    #[test]
    fn test_from_env_overrides_and_errors() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _a = EnvVarGuard::set("TENANTRY_MAX_CONCURRENT_REQUESTS", Some("8"));
        let _b = EnvVarGuard::set("TENANTRY_ALLOW_LIST_PATH", None);
        let _c = EnvVarGuard::set("TENANTRY_KEY_PREFIX", Some("relative"));
        assert!(ApiConfig::from_env().is_err());

        let _c = EnvVarGuard::set("TENANTRY_KEY_PREFIX", Some("/custom"));
        let config = ApiConfig::from_env().expect("valid config");
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.tenancy.key_prefix, "/custom");
    }
}
