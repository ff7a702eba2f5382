//! End-session endpoint.
//!
//! Logout:
//! 1. Resolves the subject from the session cookie, else from a bearer
//!    access token
//! 2. Revokes every token of that subject
//! 3. Terminates the browser session and clears its cookie
//! 4. Redirects to `post_logout_redirect_uri` (with `state`) when the
//!    client registered it, else answers with a JSON summary
//!
//! The endpoint is lenient: without a session or token it still clears the
//! cookie and succeeds.

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::middleware::bearer_token;
use crate::retry::with_retry;
use crate::token::find_by_reference;
use crate::types::{Client, TokenKind, permissions};

use super::OAuthState;

/// Logout parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub client_id: Option<String>,

    /// Must be registered for the client.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,

    /// Echoed back on the redirect.
    #[serde(default)]
    pub state: Option<String>,
}

/// JSON answer when no redirect was requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
    pub revoked_tokens: u64,
}

/// `GET /connect/logout`
pub async fn logout_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    jar: CookieJar,
    query: Result<Query<LogoutRequest>, QueryRejection>,
) -> Result<Response, AuthError> {
    let Query(request) = query.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    logout(&state, &headers, jar, request).await
}

/// `POST /connect/logout` with a form body.
pub async fn logout_form_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    jar: CookieJar,
    form: Result<Form<LogoutRequest>, FormRejection>,
) -> Result<Response, AuthError> {
    let Form(request) = form.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    logout(&state, &headers, jar, request).await
}

async fn logout(
    state: &OAuthState,
    headers: &HeaderMap,
    jar: CookieJar,
    request: LogoutRequest,
) -> Result<Response, AuthError> {
    let cookie_name = state.config.session_cookie.clone();
    let session_id = jar.get(&cookie_name).map(|c| c.value().to_string());

    // Validate the redirect before anything is revoked
    let redirect = match &request.post_logout_redirect_uri {
        Some(uri) => Some(post_logout_redirect(state, headers, &request, uri).await?),
        None => None,
    };

    let mut subject = None;
    if let Some(session_id) = &session_id {
        subject = state
            .stores
            .sessions
            .find(session_id)
            .await?
            .map(|s| s.subject);
    }
    if subject.is_none()
        && let Some(reference) = bearer_token(headers)
        && let Some(token) = find_by_reference(state.stores.tokens.as_ref(), reference).await?
        && token.kind == TokenKind::Access
        && token.is_active()
    {
        subject = token.subject;
    }

    let mut revoked_tokens = 0;
    if let Some(subject) = &subject {
        let tokens = state.stores.tokens.as_ref();
        revoked_tokens = with_retry(&state.config.retry, "logout_revoke_subject", || {
            tokens.revoke_by_subject(subject)
        })
        .await?;
        tracing::info!(subject = %subject, revoked_tokens, "Subject logged out");
    } else {
        tracing::debug!("Logout without a resolvable subject, clearing cookie only");
    }

    if let Some(session_id) = &session_id {
        state.stores.sessions.terminate(session_id).await?;
    }

    let jar = jar.remove(Cookie::build(cookie_name).path("/"));

    match redirect {
        Some(location) => Ok((jar, Redirect::to(&location)).into_response()),
        None => Ok((
            jar,
            [(header::CACHE_CONTROL, "no-store")],
            Json(LogoutResponse {
                logged_out: true,
                revoked_tokens,
            }),
        )
            .into_response()),
    }
}

/// Resolves the client the redirect belongs to and checks registration.
async fn post_logout_redirect(
    state: &OAuthState,
    headers: &HeaderMap,
    request: &LogoutRequest,
    uri: &str,
) -> Result<String, AuthError> {
    let client = logout_client(state, headers, request)
        .await?
        .ok_or_else(|| {
            AuthError::invalid_request("client_id is required with post_logout_redirect_uri")
        })?;

    if !client.active
        || !client.has_permission(permissions::ENDPOINT_LOGOUT)
        || !client.is_post_logout_redirect_uri_allowed(uri)
    {
        return Err(AuthError::invalid_request(
            "post_logout_redirect_uri is not registered for this client",
        ));
    }

    let mut url = url::Url::parse(uri)
        .map_err(|e| AuthError::invalid_request(format!("invalid post_logout_redirect_uri: {e}")))?;
    if let Some(logout_state) = &request.state {
        url.query_pairs_mut().append_pair("state", logout_state);
    }
    Ok(url.to_string())
}

/// The client named in the request, else the client of the bearer token.
async fn logout_client(
    state: &OAuthState,
    headers: &HeaderMap,
    request: &LogoutRequest,
) -> Result<Option<Client>, AuthError> {
    if let Some(client_id) = &request.client_id {
        return state.stores.clients.find_by_client_id(client_id).await;
    }
    let Some(reference) = bearer_token(headers) else {
        return Ok(None);
    };
    match find_by_reference(state.stores.tokens.as_ref(), reference).await? {
        Some(token) => state.stores.clients.find_by_id(token.client_id).await,
        None => Ok(None),
    }
}
