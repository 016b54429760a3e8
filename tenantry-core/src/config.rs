//! Core tenancy configuration.
//!
//! Loaded from environment variables with defaults suitable for development.

use crate::error::{ConfigError, TenancyResult};
use crate::identity::{RequestScope, TenantIdentity};

/// Default backing-store prefix for resource keys.
pub const DEFAULT_KEY_PREFIX: &str = "/registry";

/// Settings shared by key construction and scope resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenancyConfig {
    /// Root under which every resource family is stored.
    pub key_prefix: String,

    /// Identity treated as the global administrator.
    pub global_admin: TenantIdentity,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            global_admin: TenantIdentity::global_admin(),
        }
    }
}

impl TenancyConfig {
    /// Create TenancyConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TENANTRY_KEY_PREFIX`: storage key root (default: `/registry`)
    /// - `TENANTRY_GLOBAL_ADMIN`: joint-string admin identity (default: `*/*/*`)
    pub fn from_env() -> TenancyResult<Self> {
        let key_prefix = std::env::var("TENANTRY_KEY_PREFIX")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

        if !key_prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "TENANTRY_KEY_PREFIX".to_string(),
                value: key_prefix,
                reason: "must be an absolute path".to_string(),
            }
            .into());
        }

        let global_admin = match std::env::var("TENANTRY_GLOBAL_ADMIN") {
            Ok(raw) if !raw.trim().is_empty() => {
                TenantIdentity::parse_joint(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                    field: "TENANTRY_GLOBAL_ADMIN".to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })?
            }
            _ => TenantIdentity::global_admin(),
        };

        Ok(Self {
            key_prefix,
            global_admin,
        })
    }

    pub fn is_global_admin(&self, tenant: &TenantIdentity) -> bool {
        tenant == &self.global_admin || tenant.is_global_admin()
    }

    /// Resolve the scope of a call from its decoded tenant.
    pub fn scope_for(&self, tenant: Option<TenantIdentity>) -> RequestScope {
        RequestScope::resolve(tenant, &self.global_admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, previous }
        }

        fn unset(key: &'static str) -> Self {
            let previous = std::env::var(key).ok();
            std::env::remove_var(key);
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _a = EnvVarGuard::unset("TENANTRY_KEY_PREFIX");
        let _b = EnvVarGuard::unset("TENANTRY_GLOBAL_ADMIN");
        let config = TenancyConfig::from_env().expect("defaults load");
        assert_eq!(config, TenancyConfig::default());
        assert_eq!(config.key_prefix, "/registry");
    }

    #[test]
    fn test_custom_admin_and_prefix() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _a = EnvVarGuard::set("TENANTRY_KEY_PREFIX", "/tenants/");
        let _b = EnvVarGuard::set("TENANTRY_GLOBAL_ADMIN", "system/ops/all");
        let config = TenancyConfig::from_env().expect("load");
        assert_eq!(config.key_prefix, "/tenants");

        let admin = TenantIdentity::new("system", "ops", "all").expect("valid");
        assert_eq!(config.scope_for(Some(admin)), RequestScope::GlobalAdmin);
        assert_eq!(
            config.scope_for(Some(TenantIdentity::global_admin())),
            RequestScope::GlobalAdmin
        );
    }

    #[test]
    fn test_invalid_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _a = EnvVarGuard::set("TENANTRY_KEY_PREFIX", "registry");
        let _b = EnvVarGuard::unset("TENANTRY_GLOBAL_ADMIN");
        assert!(TenancyConfig::from_env().is_err());

        let _c = EnvVarGuard::set("TENANTRY_KEY_PREFIX", "/registry");
        let _d = EnvVarGuard::set("TENANTRY_GLOBAL_ADMIN", "only/two");
        assert!(TenancyConfig::from_env().is_err());
    }

    #[test]
    fn test_scope_for_tenant() {
        let config = TenancyConfig::default();
        let t1 = TenantIdentity::new("t1", "w1", "c1").expect("valid");
        assert_eq!(config.scope_for(None), RequestScope::Unscoped);
        assert_eq!(config.scope_for(Some(t1.clone())), RequestScope::Tenant(t1));
    }
}
