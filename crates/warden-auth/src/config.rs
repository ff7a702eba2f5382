//! Authorization server configuration.
//!
//! All sections deserialize with `#[serde(default)]`, so a partial TOML file
//! only needs to name the values it overrides.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::GrantType;

/// Root configuration of the token engine.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://id.example.com"
/// login_url = "/account/login"
///
/// [auth.oauth]
/// access_token_lifetime = "1h"
/// refresh_token_lifetime = "14d"
///
/// [auth.scope_audiences]
/// "api.read" = ["resource-api"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Public base URL of this server.
    pub issuer: String,

    /// Where unauthenticated users are sent from the authorize endpoint.
    /// The original request is appended as `return_to`.
    pub login_url: String,

    /// Name of the browser session cookie.
    pub session_cookie: String,

    /// Token lifetimes and enabled grants.
    pub oauth: OAuthConfig,

    /// Argon2 cost parameters for client secrets.
    pub hashing: HashingConfig,

    /// Retry policy for transactional store writes.
    pub retry: RetryConfig,

    /// Keyset pagination limits.
    pub pagination: PaginationConfig,

    /// Resource audiences granted alongside each scope.
    pub scope_audiences: HashMap<String, Vec<String>>,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            login_url: "/account/login".to_string(),
            session_cookie: "warden_session".to_string(),
            oauth: OAuthConfig::default(),
            hashing: HashingConfig::default(),
            retry: RetryConfig::default(),
            pagination: PaginationConfig::default(),
            scope_audiences: HashMap::new(),
            admin: AdminConfig::default(),
        }
    }
}

/// OAuth 2.0 token lifetimes and grant types.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime. Restarted on every rotation.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Grant types the token endpoint accepts.
    /// Supported: "authorization_code", "client_credentials", "refresh_token"
    pub grant_types: Vec<String>,

    /// How often expired tokens are pruned.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(300), // 5 minutes
            access_token_lifetime: Duration::from_secs(3600),      // 1 hour
            refresh_token_lifetime: Duration::from_secs(14 * 24 * 3600), // 14 days
            grant_types: vec![
                GrantType::AuthorizationCode.as_str().to_string(),
                GrantType::ClientCredentials.as_str().to_string(),
                GrantType::RefreshToken.as_str().to_string(),
            ],
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl OAuthConfig {
    /// Returns the enabled grant types, skipping unknown names.
    ///
    /// [`AuthConfig::validate`] rejects unknown names, so after validation the
    /// result mirrors `grant_types` exactly.
    #[must_use]
    pub fn enabled_grant_types(&self) -> Vec<GrantType> {
        self.grant_types
            .iter()
            .filter_map(|g| g.parse().ok())
            .collect()
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Memory cost in KiB.
    pub memory_cost_kib: u32,
    /// Number of passes.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_cost_kib: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

/// Retry policy for transient store failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each following one.
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(10),
        }
    }
}

/// Keyset pagination limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size used when the caller does not ask for one.
    pub default_page_size: usize,
    /// Largest page size a caller may ask for.
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer key guarding `/admin`. The admin routes are not mounted without it.
    pub api_key: Option<String>,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer or login URL is empty
    /// - An unknown grant type is enabled, or none is
    /// - A lifetime is zero
    /// - Hashing costs or pagination limits are out of range
    ///
    /// Returns `ConfigError::Missing` if the admin key is configured but blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        if self.login_url.is_empty() {
            return Err(ConfigError::InvalidValue(
                "login_url cannot be empty".to_string(),
            ));
        }

        if self.session_cookie.is_empty() {
            return Err(ConfigError::InvalidValue(
                "session_cookie cannot be empty".to_string(),
            ));
        }

        if self.oauth.grant_types.is_empty() {
            return Err(ConfigError::InvalidValue(
                "at least one grant type must be enabled".to_string(),
            ));
        }

        for grant in &self.oauth.grant_types {
            if grant.parse::<GrantType>().is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid grant type: '{}'. Must be authorization_code, client_credentials, or refresh_token",
                    grant
                )));
            }
        }

        for (name, lifetime) in [
            (
                "authorization_code_lifetime",
                self.oauth.authorization_code_lifetime,
            ),
            ("access_token_lifetime", self.oauth.access_token_lifetime),
            ("refresh_token_lifetime", self.oauth.refresh_token_lifetime),
            ("cleanup_interval", self.oauth.cleanup_interval),
        ] {
            if lifetime.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        // Argon2 minimums: 8 KiB per lane, at least one pass and lane
        if self.hashing.parallelism == 0 || self.hashing.time_cost == 0 {
            return Err(ConfigError::InvalidValue(
                "hashing time_cost and parallelism must be > 0".to_string(),
            ));
        }
        if self.hashing.memory_cost_kib < 8 * self.hashing.parallelism {
            return Err(ConfigError::InvalidValue(
                "hashing memory_cost_kib must be at least 8 * parallelism".to_string(),
            ));
        }

        if self.pagination.max_page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_page_size must be > 0".to_string(),
            ));
        }
        if self.pagination.default_page_size == 0
            || self.pagination.default_page_size > self.pagination.max_page_size
        {
            return Err(ConfigError::InvalidValue(
                "default_page_size must be between 1 and max_page_size".to_string(),
            ));
        }

        if let Some(key) = &self.admin.api_key
            && key.trim().is_empty()
        {
            return Err(ConfigError::Missing("admin.api_key".to_string()));
        }

        Ok(())
    }

    /// Returns the resource audiences for a set of granted scopes.
    ///
    /// Audiences are deduplicated and keep the order of first appearance.
    #[must_use]
    pub fn audiences_for(&self, scopes: &[String]) -> Vec<String> {
        let mut audiences: Vec<String> = Vec::new();
        for scope in scopes {
            if let Some(resources) = self.scope_audiences.get(scope) {
                for resource in resources {
                    if !audiences.contains(resource) {
                        audiences.push(resource.clone());
                    }
                }
            }
        }
        audiences
    }
}
