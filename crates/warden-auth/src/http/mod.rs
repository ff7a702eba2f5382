//! HTTP handlers for the OAuth 2.0 / OpenID Connect endpoints.
//!
//! # Available Handlers
//!
//! - [`authorize`] - Authorization endpoint (`/connect/authorize`)
//! - [`token`] - Token endpoint (`/connect/token`)
//! - [`userinfo`] - UserInfo endpoint (`/connect/userinfo`)
//! - [`logout`] - End-session endpoint (`/connect/logout`)
//! - [`admin`] - Client and token administration (`/admin/clients`,
//!   `/admin/tokens`), mounted only when an admin API key is configured

pub mod admin;
pub mod authorize;
pub mod logout;
pub mod token;
pub mod userinfo;

use std::sync::Arc;

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::middleware::AuthState;
use crate::oauth::{AuthorizationService, GrantDispatcher};
use crate::registry::ClientRegistry;
use crate::secret::SecretHasher;
use crate::storage::Stores;

pub use authorize::{authorize_form_handler, authorize_handler};
pub use logout::{LogoutRequest, LogoutResponse, logout_form_handler, logout_handler};
pub use token::token_handler;
pub use userinfo::userinfo_handler;

/// Shared state of every endpoint.
#[derive(Clone)]
pub struct OAuthState {
    pub config: Arc<AuthConfig>,
    pub stores: Stores,
    pub dispatcher: Arc<GrantDispatcher>,
    pub authorization: AuthorizationService,
    pub registry: ClientRegistry,
}

impl OAuthState {
    /// Wires the engine services over `stores`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Misconfiguration` if the configuration is invalid
    /// or an enabled grant type has no handler.
    pub fn new(stores: Stores, config: AuthConfig) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::misconfiguration(e.to_string()))?;

        let hasher = SecretHasher::new(&config.hashing)?;
        let dispatcher = GrantDispatcher::standard(&stores, &config, hasher.clone());
        dispatcher.validate()?;

        let config = Arc::new(config);
        let registry = ClientRegistry::new(
            stores.clients.clone(),
            stores.tenants.clone(),
            hasher,
            config.retry.clone(),
            config.pagination.clone(),
        );

        Ok(Self {
            authorization: AuthorizationService::new(stores.clone(), config.clone()),
            dispatcher: Arc::new(dispatcher),
            registry,
            stores,
            config,
        })
    }
}

impl FromRef<OAuthState> for AuthState {
    fn from_ref(state: &OAuthState) -> Self {
        AuthState::new(state.stores.tokens.clone(), state.stores.users.clone())
            .with_admin_key(state.config.admin.api_key.clone())
    }
}

impl std::fmt::Debug for OAuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthState")
            .field("issuer", &self.config.issuer)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Builds the router for every endpoint.
pub fn router(state: OAuthState) -> Router {
    let mut router = Router::new()
        .route(
            "/connect/authorize",
            get(authorize_handler).post(authorize_form_handler),
        )
        .route("/connect/token", post(token_handler))
        .route(
            "/connect/userinfo",
            get(userinfo_handler).post(userinfo_handler),
        )
        .route(
            "/connect/logout",
            get(logout_handler).post(logout_form_handler),
        )
        .route("/healthz", get(health_handler));

    if state.config.admin.api_key.is_some() {
        router = router.merge(admin::routes());
    } else {
        tracing::info!("No admin API key configured, admin routes disabled");
    }

    router.with_state(state)
}

/// `GET /healthz`
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Router fixtures shared by the endpoint tests.

    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Response;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::config::HashingConfig;
    use crate::storage::{ClientStorage, InMemoryAuthStorage};
    use crate::types::{Client, ClientPolicy, ClientType, ConsentType, Session, UserAccount};

    pub const ADMIN_KEY: &str = "test-admin-key";
    pub const SECRET: &str = "s3cret-value";
    pub const REDIRECT_URI: &str = "https://app.example.com/cb";
    pub const LOGOUT_URI: &str = "https://app.example.com/bye";

    pub struct Fixture {
        pub store: Arc<InMemoryAuthStorage>,
        pub state: OAuthState,
        pub tenant: Uuid,
    }

    impl Fixture {
        pub fn router(&self) -> Router {
            router(self.state.clone())
        }
    }

    pub fn config() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.hashing = HashingConfig {
            memory_cost_kib: 8,
            time_cost: 1,
            parallelism: 1,
        };
        config.admin.api_key = Some(ADMIN_KEY.to_string());
        config
    }

    /// One confidential client (`confidential-1`), one public client
    /// (`spa`), user `alice` with browser session `sess-alice`.
    pub async fn fixture() -> Fixture {
        fixture_with(config()).await
    }

    pub async fn fixture_with(config: AuthConfig) -> Fixture {
        let store = Arc::new(InMemoryAuthStorage::new());
        let tenant = Uuid::new_v4();
        store.insert_tenant(tenant).await;

        let mut alice = UserAccount::new("alice");
        alice.name = Some("Alice".to_string());
        alice.email = Some("alice@example.com".to_string());
        alice.email_verified = true;
        store.insert_user(alice).await;
        store
            .insert_session(Session {
                id: "sess-alice".to_string(),
                subject: "alice".to_string(),
                mfa_authenticated: false,
                created_at: OffsetDateTime::now_utc(),
            })
            .await;

        let state = OAuthState::new(Stores::from_backend(store.clone()), config).unwrap();
        let hash = SecretHasher::new(&state.config.hashing)
            .unwrap()
            .hash(SECRET)
            .unwrap();

        let permissions = [
            "ept:authorization",
            "ept:token",
            "ept:logout",
            "gt:authorization_code",
            "gt:refresh_token",
            "gt:client_credentials",
            "scp:openid",
            "scp:profile",
            "scp:email",
            "scp:api",
        ]
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();

        let now = OffsetDateTime::now_utc();
        let base = Client {
            id: Uuid::new_v4(),
            client_id: "confidential-1".to_string(),
            display_name: "Backend".to_string(),
            client_type: ClientType::Confidential,
            secret_hash: Some(hash),
            redirect_uris: vec![REDIRECT_URI.to_string()],
            post_logout_redirect_uris: vec![LOGOUT_URI.to_string()],
            permissions,
            consent_type: ConsentType::Implicit,
            policy: ClientPolicy {
                require_pkce: false,
                ..ClientPolicy::default()
            },
            active: true,
            tenant_id: tenant,
            created_at: now,
            updated_at: now,
        };
        ClientStorage::create(store.as_ref(), &base).await.unwrap();

        let spa = Client {
            id: Uuid::new_v4(),
            client_id: "spa".to_string(),
            display_name: "Single page app".to_string(),
            client_type: ClientType::Public,
            secret_hash: None,
            policy: ClientPolicy::default(),
            ..base
        };
        ClientStorage::create(store.as_ref(), &spa).await.unwrap();

        Fixture {
            store,
            state,
            tenant,
        }
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub fn location(response: &Response<Body>) -> String {
        response.headers()["location"].to_str().unwrap().to_string()
    }

    pub fn query_param(url: &str, name: &str) -> Option<String> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz() {
        let fixture = fixture().await;
        let response = fixture
            .router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_admin_routes_absent_without_key() {
        let mut config = config();
        config.admin.api_key = None;
        let fixture = fixture_with(config).await;

        let response = fixture
            .router()
            .oneshot(
                Request::get("/admin/clients")
                    .header("authorization", "Bearer anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_config_is_misconfiguration() {
        let mut config = config();
        config.oauth.grant_types = vec!["password".to_string()];
        let store = std::sync::Arc::new(crate::storage::InMemoryAuthStorage::new());
        let err = OAuthState::new(Stores::from_backend(store), config).unwrap_err();
        assert!(matches!(err, AuthError::Misconfiguration { .. }));
    }
}
