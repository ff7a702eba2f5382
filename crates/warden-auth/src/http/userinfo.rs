//! OpenID Connect UserInfo endpoint.
//!
//! Returns the claims of the token's subject that the granted scopes release:
//! `sub` always, `name` with `profile`, `email`/`email_verified` with
//! `email`, `roles` with `roles`.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "sub": "alice",
//!   "email": "alice@example.com",
//!   "email_verified": true
//! }
//! ```

use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};

use crate::error::AuthError;
use crate::middleware::BearerAuth;
use crate::oauth::principal::{Principal, SCOPE_OPENID};

use super::OAuthState;

/// `GET|POST /connect/userinfo`
pub async fn userinfo_handler(
    State(state): State<OAuthState>,
    BearerAuth(token): BearerAuth,
) -> Result<impl IntoResponse, AuthError> {
    if !token.scopes.iter().any(|s| s == SCOPE_OPENID) {
        return Err(AuthError::invalid_scope(
            "The openid scope is required for the userinfo endpoint",
        ));
    }

    let subject = token.subject.as_deref().ok_or_else(|| {
        AuthError::access_denied("The userinfo endpoint requires a user-delegated token")
    })?;

    let user = state
        .stores
        .users
        .find_by_subject(subject)
        .await?
        .filter(|user| user.can_sign_in())
        .ok_or_else(|| {
            tracing::debug!(subject, "Userinfo requested for a missing or disabled user");
            AuthError::invalid_token("The access token is invalid")
        })?;

    let principal = Principal::new(&user, token.scopes.clone(), token.audiences.clone());

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(principal.identity_claims()),
    ))
}
