//! OAuth 2.0 Token endpoint handler.
//!
//! # Example
//!
//! ```ignore
//! // Authorization code grant
//! POST /connect/token
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=authorization_code
//! &code=SplxlOBeZQQYbYS6WxSbIA
//! &redirect_uri=https://app.example.com/callback
//! &code_verifier=dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk
//! &client_id=my-app
//!
//! // Client credentials grant
//! POST /connect/token
//! Content-Type: application/x-www-form-urlencoded
//! Authorization: Basic <base64(client_id:client_secret)>
//!
//! grant_type=client_credentials
//! &scope=api
//! ```

use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::{HeaderMap, header},
    response::IntoResponse,
};

use crate::error::AuthError;
use crate::oauth::client_auth::{INVALID_CLIENT_DESCRIPTION, parse_basic_auth};
use crate::oauth::token::TokenRequest;

use super::OAuthState;

/// `POST /connect/token`
///
/// Clients authenticate with HTTP Basic (`client_secret_basic`), with
/// `client_id`/`client_secret` in the body (`client_secret_post`), or, for
/// public clients, with `client_id` alone. Basic credentials win.
pub async fn token_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let Form(request) = form.map_err(|e| AuthError::invalid_request(e.body_text()))?;

    tracing::debug!(
        grant_type = %request.grant_type,
        client_id = ?request.client_id,
        "Processing token request"
    );

    let basic = basic_credentials(&headers)?;
    let response = state.dispatcher.exchange(&request, basic).await?;

    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    ))
}

/// Reads `client_secret_basic` credentials. A Basic header that does not
/// decode is an authentication failure, not an absent header.
fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, AuthError> {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return Ok(None);
    };
    if !value.trim_start().starts_with("Basic ") {
        return Ok(None);
    }
    parse_basic_auth(value)
        .map(Some)
        .ok_or_else(|| AuthError::invalid_client(INVALID_CLIENT_DESCRIPTION))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tower::ServiceExt;

    use crate::oauth::TOKEN_THEFT_DESCRIPTION;
    use crate::types::TokenStatus;

    fn form_request(body: &str) -> Request<Body> {
        Request::post("/connect/token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
    }

    #[tokio::test]
    async fn test_client_credentials_with_basic_auth() {
        let fixture = fixture().await;
        let mut request = form_request("grant_type=client_credentials&scope=api");
        request.headers_mut().insert(
            header::AUTHORIZATION,
            basic("confidential-1", SECRET).parse().unwrap(),
        );

        let response = fixture.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let body = body_json(response).await;
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["scope"], "api");
        assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
        assert!(body.get("refresh_token").is_none());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_invalid_client() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(form_request(
                "grant_type=client_credentials&client_id=confidential-1&client_secret=nope",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_client");
        assert_eq!(body["error_description"], INVALID_CLIENT_DESCRIPTION);
    }

    #[tokio::test]
    async fn test_malformed_basic_header_is_invalid_client() {
        let fixture = fixture().await;
        let mut request = form_request("grant_type=client_credentials");
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, "Basic !!!".parse().unwrap());

        let response = fixture.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(form_request(
                "grant_type=password&client_id=spa&username=a&password=b",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_missing_grant_type_is_invalid_request() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(form_request("client_id=spa"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_code_flow_and_refresh_replay() {
        let fixture = fixture().await;
        let router = fixture.router();

        // Sign in through the authorize endpoint
        let authorize = Request::get(format!(
            "/connect/authorize?response_type=code&client_id=confidential-1\
             &redirect_uri={REDIRECT_URI}&scope=openid%20email&state=xyz"
        ))
        .header("cookie", "warden_session=sess-alice")
        .body(Body::empty())
        .unwrap();
        let response = router.clone().oneshot(authorize).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let code = query_param(&location(&response), "code").unwrap();

        let exchange = |body: String| {
            let mut request = form_request(&body);
            request.headers_mut().insert(
                header::AUTHORIZATION,
                basic("confidential-1", SECRET).parse().unwrap(),
            );
            router.clone().oneshot(request)
        };

        let response = exchange(format!(
            "grant_type=authorization_code&code={code}&redirect_uri={REDIRECT_URI}"
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let refresh = body["refresh_token"].as_str().unwrap().to_string();
        assert_eq!(body["scope"], "openid email");

        // The code is single-use
        let response = exchange(format!(
            "grant_type=authorization_code&code={code}&redirect_uri={REDIRECT_URI}"
        ))
        .await
        .unwrap();
        assert_eq!(body_json(response).await["error"], "invalid_grant");

        // First rotation succeeds
        let response = exchange(format!("grant_type=refresh_token&refresh_token={refresh}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Replaying the rotated token is treated as theft
        let response = exchange(format!("grant_type=refresh_token&refresh_token={refresh}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_grant");
        assert_eq!(body["error_description"], TOKEN_THEFT_DESCRIPTION);

        let alice_tokens = fixture
            .store
            .tokens()
            .await
            .into_iter()
            .filter(|t| t.subject.as_deref() == Some("alice"))
            .collect::<Vec<_>>();
        assert!(!alice_tokens.is_empty());
        assert!(
            alice_tokens
                .iter()
                .all(|t| t.status == TokenStatus::Revoked)
        );
    }
}
