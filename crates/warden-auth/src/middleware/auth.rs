//! Bearer token extraction.
//!
//! Access tokens are opaque references. The extractor hashes the presented
//! reference, loads the token and rejects anything that is not an active
//! access token, so handlers only ever see usable tokens.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::AuthError;
use crate::storage::{TokenStorage, UserStorage};
use crate::token::resolve_access_token;
use crate::types::Token;

/// State needed by the authentication extractors.
///
/// Make it reachable from the router state with `FromRef`:
///
/// ```ignore
/// impl FromRef<OAuthState> for AuthState {
///     fn from_ref(state: &OAuthState) -> Self {
///         state.auth_state()
///     }
/// }
/// ```
#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<dyn TokenStorage>,
    pub users: Arc<dyn UserStorage>,
    /// Key accepted by [`super::AdminAuth`]; `None` disables admin access.
    pub admin_key: Option<String>,
}

impl AuthState {
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenStorage>, users: Arc<dyn UserStorage>) -> Self {
        Self {
            tokens,
            users,
            admin_key: None,
        }
    }

    #[must_use]
    pub fn with_admin_key(mut self, admin_key: Option<String>) -> Self {
        self.admin_key = admin_key;
        self
    }
}

/// Axum extractor for a valid bearer access token.
///
/// # Errors
///
/// Rejects with `invalid_token` (401) when the header is missing or
/// malformed, or the token is unknown, expired, redeemed or revoked.
///
/// # Example
///
/// ```ignore
/// async fn handler(BearerAuth(token): BearerAuth) -> impl IntoResponse {
///     token.subject.unwrap_or_default()
/// }
/// ```
pub struct BearerAuth(pub Token);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);

        let reference = bearer_token(&parts.headers)
            .ok_or_else(|| AuthError::invalid_token("Missing bearer token"))?;

        let token = resolve_access_token(auth_state.tokens.as_ref(), reference).await?;

        tracing::debug!(
            token_id = %token.id,
            subject = token.subject.as_deref().unwrap_or_default(),
            "Bearer token validated"
        );
        Ok(BearerAuth(token))
    }
}

/// Returns the reference of an `Authorization: Bearer` header, if present.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YTpi"));
        assert_eq!(bearer_token(&headers), None);
    }
}
