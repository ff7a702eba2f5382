//! OAuth 2.0 client domain types.
//!
//! A [`Client`] owns its [`ClientPolicy`] by value. What a client may do is
//! expressed as a flat list of permission strings:
//!
//! - `gt:<grant_type>` allows a grant at the token endpoint
//! - `scp:<scope>` allows a scope to be requested
//! - `ept:<endpoint>` allows an endpoint to be called

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::error::AuthError;
use crate::pagination::{Keyset, SortKind, SortValue};

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Client Credentials flow (confidential clients only).
    ClientCredentials,
    /// Refresh Token flow.
    RefreshToken,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "client_credentials" => Ok(Self::ClientCredentials),
            "refresh_token" => Ok(Self::RefreshToken),
            other => Err(AuthError::unsupported_grant_type(other)),
        }
    }
}

// =============================================================================
// Client classification
// =============================================================================

/// Whether a client can keep a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Runs where a secret cannot be protected (SPAs, native apps).
    Public,
    /// Authenticates with a secret at the token endpoint.
    Confidential,
}

impl ClientType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Confidential => "confidential",
        }
    }
}

impl FromStr for ClientType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "confidential" => Ok(Self::Confidential),
            other => Err(AuthError::invalid_argument(format!(
                "unknown client type '{other}'"
            ))),
        }
    }
}

/// How user consent is obtained for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    /// The user is asked; the first grant creates a permanent authorization.
    Explicit,
    /// Consent is managed elsewhere; requests without an existing
    /// authorization are refused.
    External,
    /// Consent is assumed and recorded as a permanent authorization.
    Implicit,
    /// Consent is assumed on every request.
    Systematic,
}

impl ConsentType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::External => "external",
            Self::Implicit => "implicit",
            Self::Systematic => "systematic",
        }
    }
}

impl FromStr for ConsentType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(Self::Explicit),
            "external" => Ok(Self::External),
            "implicit" => Ok(Self::Implicit),
            "systematic" => Ok(Self::Systematic),
            other => Err(AuthError::invalid_argument(format!(
                "unknown consent type '{other}'"
            ))),
        }
    }
}

// =============================================================================
// Permissions
// =============================================================================

/// Permission string helpers.
pub mod permissions {
    use super::GrantType;

    pub const GRANT_TYPE_PREFIX: &str = "gt:";
    pub const SCOPE_PREFIX: &str = "scp:";
    pub const ENDPOINT_PREFIX: &str = "ept:";

    pub const ENDPOINT_AUTHORIZATION: &str = "ept:authorization";
    pub const ENDPOINT_TOKEN: &str = "ept:token";
    pub const ENDPOINT_LOGOUT: &str = "ept:logout";

    #[must_use]
    pub fn grant_type(grant: GrantType) -> String {
        format!("{GRANT_TYPE_PREFIX}{grant}")
    }

    #[must_use]
    pub fn scope(scope: &str) -> String {
        format!("{SCOPE_PREFIX}{scope}")
    }

    /// Returns `true` if the string uses a known permission prefix.
    #[must_use]
    pub fn is_well_formed(permission: &str) -> bool {
        [GRANT_TYPE_PREFIX, SCOPE_PREFIX, ENDPOINT_PREFIX]
            .iter()
            .any(|prefix| {
                permission
                    .strip_prefix(prefix)
                    .is_some_and(|rest| !rest.is_empty())
            })
    }
}

// =============================================================================
// Client Policy
// =============================================================================

/// Sign-in policy owned by a client. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPolicy {
    /// Authorization requests must carry a PKCE challenge.
    pub require_pkce: bool,
    /// The browser session must have completed a second factor.
    pub require_mfa: bool,
    /// The user's email address must be verified.
    pub require_email_verification: bool,
    /// Minimum password length enforced by the identity subsystem.
    pub min_password_length: u32,
}

/// Smallest accepted [`ClientPolicy::min_password_length`].
pub const MIN_PASSWORD_LENGTH_FLOOR: u32 = 6;

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            require_pkce: true,
            require_mfa: false,
            require_email_verification: false,
            min_password_length: 8,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// A registered OAuth 2.0 client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Internal id. Never sent over the protocol.
    pub id: Uuid,

    /// Public client identifier used in OAuth flows.
    pub client_id: String,

    /// Human-readable display name.
    pub display_name: String,

    pub client_type: ClientType,

    /// Argon2 PHC hash of the client secret (confidential clients only).
    #[serde(default, skip_serializing)]
    pub secret_hash: Option<String>,

    /// Absolute redirect URIs for the authorization code flow.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Absolute URIs the logout endpoint may redirect to.
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,

    /// `gt:`, `scp:` and `ept:` permission strings.
    #[serde(default)]
    pub permissions: Vec<String>,

    pub consent_type: ConsentType,

    #[serde(default)]
    pub policy: ClientPolicy,

    /// Inactive clients cannot authenticate or authorize.
    pub active: bool,

    /// Owning tenant.
    pub tenant_id: Uuid,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Client {
    /// Validates the client against its write-time rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.trim().is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.display_name.trim().is_empty() {
            return Err(ClientValidationError::EmptyDisplayName);
        }

        match self.client_type {
            ClientType::Public => {
                if self.secret_hash.is_some() {
                    return Err(ClientValidationError::PublicClientWithSecret);
                }
                if self.is_grant_type_allowed(GrantType::ClientCredentials) {
                    return Err(ClientValidationError::PublicClientCredentials);
                }
            }
            ClientType::Confidential => {
                if self.secret_hash.as_deref().is_none_or(str::is_empty) {
                    return Err(ClientValidationError::MissingSecret);
                }
            }
        }

        if let Some(bad) = self
            .permissions
            .iter()
            .find(|p| !permissions::is_well_formed(p))
        {
            return Err(ClientValidationError::MalformedPermission(bad.clone()));
        }

        if self.is_grant_type_allowed(GrantType::AuthorizationCode) && self.redirect_uris.is_empty()
        {
            return Err(ClientValidationError::NoRedirectUris);
        }

        if let Some(bad) = self
            .redirect_uris
            .iter()
            .chain(&self.post_logout_redirect_uris)
            .find(|uri| Url::parse(uri).is_err())
        {
            return Err(ClientValidationError::RelativeRedirectUri(bad.clone()));
        }

        if self.policy.min_password_length < MIN_PASSWORD_LENGTH_FLOOR {
            return Err(ClientValidationError::PasswordLengthTooShort);
        }

        Ok(())
    }

    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential
    }

    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Checks if the client may use the given grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.has_permission(&permissions::grant_type(grant_type))
    }

    /// Checks if the client may request the given scope.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.has_permission(&permissions::scope(scope))
    }

    /// Returns every scope the client holds a permission for.
    #[must_use]
    pub fn granted_scopes(&self) -> Vec<String> {
        self.permissions
            .iter()
            .filter_map(|p| p.strip_prefix(permissions::SCOPE_PREFIX))
            .map(str::to_string)
            .collect()
    }

    /// Checks if the given redirect URI is registered (exact match).
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Checks if the given post-logout redirect URI is registered.
    ///
    /// Query parameters are ignored on both sides.
    #[must_use]
    pub fn is_post_logout_redirect_uri_allowed(&self, uri: &str) -> bool {
        let uri_without_query = uri.split('?').next().unwrap_or(uri);

        self.post_logout_redirect_uris.iter().any(|allowed| {
            let allowed_without_query = allowed.split('?').next().unwrap_or(allowed);
            allowed_without_query == uri_without_query
        })
    }
}

impl Keyset for Client {
    fn keyset_id(&self) -> Uuid {
        self.id
    }

    fn sort_kind(field: &str) -> Option<SortKind> {
        match field {
            "created_at" | "updated_at" => Some(SortKind::Timestamp),
            "client_id" | "display_name" => Some(SortKind::Text),
            _ => None,
        }
    }

    fn sort_value(&self, field: &str) -> Option<SortValue> {
        match field {
            "created_at" => Some(SortValue::Timestamp(self.created_at)),
            "updated_at" => Some(SortValue::Timestamp(self.updated_at)),
            "client_id" => Some(SortValue::Text(self.client_id.clone())),
            "display_name" => Some(SortValue::Text(self.display_name.clone())),
            _ => None,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Write-time rule violations for clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    #[error("Client ID cannot be empty")]
    EmptyClientId,

    #[error("Client display name cannot be empty")]
    EmptyDisplayName,

    #[error("Public clients cannot carry a client secret")]
    PublicClientWithSecret,

    #[error("Public clients cannot use client_credentials grant")]
    PublicClientCredentials,

    #[error("Confidential clients require a client secret")]
    MissingSecret,

    #[error("Malformed permission '{0}'")]
    MalformedPermission(String),

    #[error("Authorization code flow requires redirect URIs")]
    NoRedirectUris,

    #[error("Redirect URI '{0}' is not an absolute URI")]
    RelativeRedirectUri(String),

    #[error("Minimum password length cannot be below 6")]
    PasswordLengthTooShort,
}

impl From<ClientValidationError> for AuthError {
    fn from(err: ClientValidationError) -> Self {
        AuthError::business_rule(err.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
