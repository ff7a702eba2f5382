//! Error response handling for the HTTP edge.
//!
//! `AuthError` renders as the OAuth 2.0 error document
//! `{ "error", "error_description" }`. Server-side failures are logged here
//! and reported generically.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::AuthError;
use crate::oauth::token::ErrorResponse;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.is_server_error() {
            if matches!(self, AuthError::Misconfiguration { .. }) {
                tracing::error!(error = %self, category = %self.category(), "Server misconfiguration");
            } else {
                tracing::error!(error = %self, category = %self.category(), "Request failed");
            }
        } else {
            tracing::debug!(error = %self, category = %self.category(), "Request rejected");
        }

        let body = ErrorResponse::from(&self);

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

        if status == StatusCode::UNAUTHORIZED {
            let www_auth = build_www_authenticate_header(&self, &body);
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Builds the WWW-Authenticate challenge for a 401.
///
/// Client authentication failures challenge with `Basic`, bearer token
/// failures with `Bearer` (RFC 6750 section 3).
fn build_www_authenticate_header(error: &AuthError, body: &ErrorResponse) -> String {
    let scheme = match error {
        AuthError::InvalidClient { .. } => "Basic",
        _ => "Bearer",
    };
    let description = body
        .error_description
        .as_deref()
        .unwrap_or_default()
        .replace('"', "'");
    format!(
        r#"{scheme} realm="warden", error="{}", error_description="{description}""#,
        body.error
    )
}
