//! OAuth 2.0 Authorization endpoint handlers.
//!
//! ```text
//! GET|POST /connect/authorize
//!     │
//!     ├─► SignedIn         → 303 to redirect_uri?code=..&state=..
//!     ├─► Forbidden        → 303 to redirect_uri?error=..&state=..
//!     └─► ChallengeIssued  → 303 to the login page, request kept in return_to
//! ```
//!
//! Errors that make the redirect URI untrustworthy are rendered as a JSON
//! error document instead of being redirected.

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;

use crate::error::AuthError;
use crate::oauth::{AuthorizeOutcome, AuthorizeRequest};

use super::OAuthState;

/// `GET /connect/authorize`
pub async fn authorize_handler(
    State(state): State<OAuthState>,
    jar: CookieJar,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Result<Response, AuthError> {
    let Query(request) = query.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    authorize(&state, &jar, &request).await
}

/// `POST /connect/authorize` with a form body.
pub async fn authorize_form_handler(
    State(state): State<OAuthState>,
    jar: CookieJar,
    form: Result<Form<AuthorizeRequest>, FormRejection>,
) -> Result<Response, AuthError> {
    let Form(request) = form.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    authorize(&state, &jar, &request).await
}

async fn authorize(
    state: &OAuthState,
    jar: &CookieJar,
    request: &AuthorizeRequest,
) -> Result<Response, AuthError> {
    let session_id = jar
        .get(&state.config.session_cookie)
        .map(|cookie| cookie.value().to_string());

    let location = match state
        .authorization
        .authorize(request, session_id.as_deref())
        .await?
    {
        AuthorizeOutcome::SignedIn(granted) => granted.redirect_url()?,
        AuthorizeOutcome::Forbidden(denied) => denied.redirect_url()?,
        AuthorizeOutcome::ChallengeIssued { login_url } => login_url,
    };

    Ok(Redirect::to(&location).into_response())
}
