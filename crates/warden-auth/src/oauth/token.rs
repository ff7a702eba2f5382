//! Token endpoint wire types.
//!
//! # Supported Grant Types
//!
//! - `authorization_code` - Exchange authorization code for tokens
//! - `refresh_token` - Rotate a refresh token
//! - `client_credentials` - Machine-to-machine authentication
//!
//! Tokens are opaque reference strings; nothing in the response is decodable
//! by the client.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Token request parameters.
///
/// Different fields are required depending on the `grant_type`:
///
/// - `authorization_code`: code, redirect_uri, code_verifier
/// - `refresh_token`: refresh_token, (optional) scope
/// - `client_credentials`: (optional) scope
///
/// Client credentials arrive either here (`client_secret_post`) or in the
/// Basic auth header, which is not part of this struct.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    pub grant_type: String,

    /// Authorization code (for authorization_code grant).
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI (must match authorization request).
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier (for authorization_code grant).
    #[serde(default)]
    pub code_verifier: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// Refresh token (for refresh_token grant).
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope, space-separated.
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Returns the requested scopes, or `None` when no scope was sent.
    #[must_use]
    pub fn requested_scopes(&self) -> Option<Vec<String>> {
        self.scope.as_deref().map(parse_scope)
    }
}

/// Successful token response.
///
/// # Example Response
///
/// ```json
/// {
///   "access_token": "k3Jx...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid profile",
///   "refresh_token": "Q9bz..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes (space-separated).
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }
}

/// OAuth 2.0 error body.
///
/// ```json
/// {
///   "error": "invalid_grant",
///   "error_description": "authorization code no longer valid"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&AuthError> for ErrorResponse {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: Some(err.public_description()),
        }
    }
}

/// Splits a space-separated scope string, dropping duplicates.
#[must_use]
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

/// Joins scopes into their wire form.
#[must_use]
pub fn format_scope(scopes: &[String]) -> String {
    scopes.join(" ")
}
