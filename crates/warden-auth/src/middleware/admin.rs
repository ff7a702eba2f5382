//! Admin API key extractor.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use warden_auth::middleware::AdminAuth;
//!
//! async fn admin_handler(_admin: AdminAuth) -> &'static str {
//!     "ok"
//! }
//! ```

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

use super::auth::{AuthState, bearer_token};

/// Proof that the request carried the configured admin key.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);

        let Some(expected) = auth_state.admin_key.as_deref() else {
            return Err(AuthError::access_denied("The admin API is disabled"));
        };

        let presented = bearer_token(&parts.headers)
            .ok_or_else(|| AuthError::invalid_token("Missing admin API key"))?;

        if !keys_match(presented, expected) {
            tracing::warn!(
                endpoint = %parts.uri.path(),
                method = %parts.method,
                "Admin access denied: wrong API key"
            );
            return Err(AuthError::invalid_token("Invalid admin API key"));
        }

        Ok(AdminAuth)
    }
}

/// Compares digests of both keys; the digests are fixed length, so the key
/// length does not show in the comparison time either.
fn keys_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented.as_slice().ct_eq(expected.as_slice()).into()
}
