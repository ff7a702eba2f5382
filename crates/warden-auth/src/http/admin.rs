//! Client and token administration endpoints.
//!
//! Every route requires `Authorization: Bearer <admin api key>`.
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | GET | `/admin/clients` | keyset listing |
//! | POST | `/admin/clients` | register (plaintext secret returned once) |
//! | GET | `/admin/clients/{client_id}` | read |
//! | PATCH | `/admin/clients/{client_id}` | partial settings update |
//! | DELETE | `/admin/clients/{client_id}` | delete with cascade |
//! | PUT | `/admin/clients/{client_id}/policy` | replace the policy |
//! | PUT | `/admin/clients/{client_id}/active` | activate / deactivate |
//! | POST | `/admin/clients/{client_id}/secret` | rotate the secret |
//! | GET | `/admin/tokens` | filtered keyset listing of tokens |
//! | DELETE | `/admin/tokens/{id}` | revoke one token |

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::middleware::AdminAuth;
use crate::pagination::{Page, PageRequest};
use crate::registry::{ClientSummary, ClientUpdate, NewClient, RegisteredClient};
use crate::types::{Client, ClientPolicy, Token, TokenFilter, TokenKind, TokenStatus};

use super::OAuthState;

/// Query parameters of the client listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientListParams {
    /// Sortable field; defaults to `created_at`.
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
}

/// Query parameters of the token listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenListParams {
    /// Sortable field; defaults to `created_at`.
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
    /// Public identifier of the client the tokens were issued to.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub status: Option<TokenStatus>,
    #[serde(default)]
    pub kind: Option<TokenKind>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotatedSecret {
    pub client_id: String,
    pub client_secret: String,
}

pub(super) fn routes() -> Router<OAuthState> {
    Router::new()
        .route("/admin/clients", get(list_clients).post(register_client))
        .route(
            "/admin/clients/{client_id}",
            get(get_client).patch(update_client).delete(delete_client),
        )
        .route("/admin/clients/{client_id}/policy", put(replace_policy))
        .route("/admin/clients/{client_id}/active", put(set_active))
        .route("/admin/clients/{client_id}/secret", post(rotate_secret))
        .route("/admin/tokens", get(list_tokens))
        .route("/admin/tokens/{id}", delete(revoke_token))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    body.map(|Json(value)| value)
        .map_err(|e| AuthError::invalid_request(e.body_text()))
}

fn page_request(
    order_by: Option<String>,
    descending: bool,
    page_size: Option<usize>,
    cursor: Option<String>,
    default_page_size: usize,
) -> PageRequest {
    let request = PageRequest::new(
        order_by.unwrap_or_else(|| "created_at".to_string()),
        page_size.unwrap_or(default_page_size),
    )
    .after(cursor);
    if descending {
        request.descending()
    } else {
        request
    }
}

/// `GET /admin/clients`
pub async fn list_clients(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    params: Result<Query<ClientListParams>, QueryRejection>,
) -> Result<Json<Page<ClientSummary>>, AuthError> {
    let Query(params) = params.map_err(|e| AuthError::invalid_request(e.body_text()))?;

    let request = page_request(
        params.order_by,
        params.descending,
        params.page_size,
        params.cursor,
        state.registry.default_page_size(),
    );
    let page = state.registry.list(params.tenant_id, &request).await?;
    Ok(Json(page))
}

/// `POST /admin/clients`
pub async fn register_client(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    body: Result<Json<NewClient>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let registered: RegisteredClient = state.registry.register(json_body(body)?).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

/// `GET /admin/clients/{client_id}`
pub async fn get_client(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    Path(client_id): Path<String>,
) -> Result<Json<Client>, AuthError> {
    Ok(Json(state.registry.get(&client_id).await?))
}

/// `PATCH /admin/clients/{client_id}`
pub async fn update_client(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    Path(client_id): Path<String>,
    body: Result<Json<ClientUpdate>, JsonRejection>,
) -> Result<Json<Client>, AuthError> {
    let update = json_body(body)?;
    Ok(Json(state.registry.update(&client_id, update).await?))
}

/// `DELETE /admin/clients/{client_id}`
pub async fn delete_client(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, AuthError> {
    state.registry.delete(&client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /admin/clients/{client_id}/policy`
pub async fn replace_policy(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    Path(client_id): Path<String>,
    body: Result<Json<ClientPolicy>, JsonRejection>,
) -> Result<Json<Client>, AuthError> {
    let policy = json_body(body)?;
    Ok(Json(state.registry.update_policy(&client_id, policy).await?))
}

/// `PUT /admin/clients/{client_id}/active`
pub async fn set_active(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    Path(client_id): Path<String>,
    body: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Result<Json<Client>, AuthError> {
    let SetActiveRequest { active } = json_body(body)?;
    Ok(Json(state.registry.set_active(&client_id, active).await?))
}

/// `POST /admin/clients/{client_id}/secret`
pub async fn rotate_secret(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, AuthError> {
    let client_secret = state.registry.rotate_secret(&client_id).await?;
    Ok((
        [(axum::http::header::CACHE_CONTROL, "no-store")],
        Json(RotatedSecret {
            client_id,
            client_secret,
        }),
    ))
}

/// `GET /admin/tokens`
///
/// Reference hashes are never part of the listing.
pub async fn list_tokens(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    params: Result<Query<TokenListParams>, QueryRejection>,
) -> Result<Json<Page<Token>>, AuthError> {
    let Query(params) = params.map_err(|e| AuthError::invalid_request(e.body_text()))?;

    let client_id = match params.client_id.as_deref() {
        Some(client_id) => Some(state.registry.get(client_id).await?.id),
        None => None,
    };
    let filter = TokenFilter {
        client_id,
        subject: params.subject,
        status: params.status,
        kind: params.kind,
    };

    let pagination = &state.config.pagination;
    let query = page_request(
        params.order_by,
        params.descending,
        params.page_size,
        params.cursor,
        pagination.default_page_size,
    )
    .validate::<Token>(pagination.max_page_size)?;

    Ok(Json(state.stores.tokens.page(&filter, &query).await?))
}

/// `DELETE /admin/tokens/{id}`
pub async fn revoke_token(
    _admin: AdminAuth,
    State(state): State<OAuthState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    if !state.stores.tokens.revoke(id).await? {
        return Err(AuthError::not_found(format!("unrevoked token {id}")));
    }
    tracing::info!(token_id = %id, "Token revoked by administrator");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::storage::{ClientStorage, TokenStorage};
    use crate::types::{Token, TokenKind, TokenStatus};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use time::OffsetDateTime;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn token(client_id: Uuid, subject: &str, kind: TokenKind) -> Token {
        let now = OffsetDateTime::now_utc();
        Token {
            id: Uuid::new_v4(),
            reference_hash: Token::hash_reference(&Token::generate_reference()),
            subject: Some(subject.to_string()),
            client_id,
            authorization_id: None,
            kind,
            status: TokenStatus::Valid,
            scopes: vec!["openid".to_string()],
            audiences: vec![],
            code_challenge: None,
            redirect_uri: None,
            created_at: now,
            expires_at: now + time::Duration::hours(1),
            redeemed_at: None,
        }
    }

    fn admin(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {ADMIN_KEY}"));
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_wrong_key_is_rejected() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(
                Request::get("/admin/clients")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_returns_secret_once() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(admin(
                "POST",
                "/admin/clients",
                Some(json!({
                    "client_id": "reporting",
                    "display_name": "Reporting",
                    "client_type": "confidential",
                    "tenant_id": fixture.tenant,
                    "permissions": ["ept:token", "gt:client_credentials", "scp:api"],
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert!(
            body["client_secret"]
                .as_str()
                .is_some_and(|s| s.starts_with("wcs_"))
        );
        assert!(body["client"].get("secret_hash").is_none());

        let response = fixture
            .router()
            .oneshot(admin("GET", "/admin/clients/reporting", None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["client_id"], "reporting");
        assert!(body.get("client_secret").is_none());
    }

    #[tokio::test]
    async fn test_public_client_with_secret_is_rejected() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(admin(
                "POST",
                "/admin/clients",
                Some(json!({
                    "display_name": "SPA",
                    "client_type": "public",
                    "tenant_id": fixture.tenant,
                    "client_secret": "nope",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_listing_pages_with_cursor() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(admin(
                "GET",
                "/admin/clients?order_by=client_id&page_size=1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["items"][0]["client_id"], "confidential-1");
        let cursor = body["next_cursor"].as_str().unwrap().to_string();

        let response = fixture
            .router()
            .oneshot(admin(
                "GET",
                &format!("/admin/clients?order_by=client_id&page_size=1&cursor={cursor}"),
                None,
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["items"][0]["client_id"], "spa");
        assert!(body["next_cursor"].is_null());

        let response = fixture
            .router()
            .oneshot(admin("GET", "/admin/clients?order_by=secret_hash", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_policy_secret_and_delete() {
        let fixture = fixture().await;

        let response = fixture
            .router()
            .oneshot(admin(
                "PUT",
                "/admin/clients/confidential-1/policy",
                Some(json!({
                    "require_pkce": true,
                    "require_mfa": true,
                    "require_email_verification": false,
                    "min_password_length": 12,
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["policy"]["require_mfa"], true);
        assert_eq!(body["policy"]["min_password_length"], 12);

        let response = fixture
            .router()
            .oneshot(admin("POST", "/admin/clients/confidential-1/secret", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await["client_secret"].is_string());

        let response = fixture
            .router()
            .oneshot(admin("POST", "/admin/clients/spa/secret", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = fixture
            .router()
            .oneshot(admin("DELETE", "/admin/clients/confidential-1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = fixture
            .router()
            .oneshot(admin("GET", "/admin/clients/confidential-1", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deactivate_client() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(admin(
                "PUT",
                "/admin/clients/confidential-1/active",
                Some(json!({ "active": false })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["active"], false);
    }

    #[tokio::test]
    async fn test_token_listing_filters_and_pages() {
        let fixture = fixture().await;
        let backend = ClientStorage::find_by_client_id(fixture.store.as_ref(), "confidential-1")
            .await
            .unwrap()
            .unwrap();
        let spa = ClientStorage::find_by_client_id(fixture.store.as_ref(), "spa")
            .await
            .unwrap()
            .unwrap();
        for token in [
            token(backend.id, "alice", TokenKind::Access),
            token(backend.id, "alice", TokenKind::Refresh),
            token(backend.id, "bob", TokenKind::Access),
            token(spa.id, "alice", TokenKind::Access),
        ] {
            TokenStorage::create(fixture.store.as_ref(), &token)
                .await
                .unwrap();
        }

        let response = fixture
            .router()
            .oneshot(admin(
                "GET",
                "/admin/tokens?client_id=confidential-1&subject=alice&page_size=1",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["subject"], "alice");
        assert!(body["items"][0].get("reference_hash").is_none());
        let cursor = body["next_cursor"].as_str().unwrap().to_string();

        let response = fixture
            .router()
            .oneshot(admin(
                "GET",
                &format!("/admin/tokens?client_id=confidential-1&subject=alice&page_size=1&cursor={cursor}"),
                None,
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert!(body["next_cursor"].is_null());

        let response = fixture
            .router()
            .oneshot(admin("GET", "/admin/tokens?kind=refresh", None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["kind"], "refresh");

        let response = fixture
            .router()
            .oneshot(admin("GET", "/admin/tokens?client_id=nobody", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = fixture
            .router()
            .oneshot(admin("GET", "/admin/tokens?order_by=subject", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_revoke_token() {
        let fixture = fixture().await;
        let backend = ClientStorage::find_by_client_id(fixture.store.as_ref(), "confidential-1")
            .await
            .unwrap()
            .unwrap();
        let issued = token(backend.id, "alice", TokenKind::Access);
        TokenStorage::create(fixture.store.as_ref(), &issued)
            .await
            .unwrap();

        let uri = format!("/admin/tokens/{}", issued.id);
        let response = fixture
            .router()
            .oneshot(admin("DELETE", &uri, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            fixture.store.token(issued.id).await.unwrap().status,
            TokenStatus::Revoked
        );

        let response = fixture
            .router()
            .oneshot(admin("DELETE", &uri, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = fixture
            .router()
            .oneshot(admin("GET", "/admin/tokens?status=revoked", None))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["items"][0]["id"], issued.id.to_string());
    }
}
