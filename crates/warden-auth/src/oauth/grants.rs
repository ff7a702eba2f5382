//! Grant dispatch for the token endpoint.
//!
//! Each supported grant type has a [`GrantHandler`] registered in a lookup
//! table. The table is checked against the enabled grant types at startup
//! ([`GrantDispatcher::validate`]); a grant that still reaches the dispatcher
//! without a handler is a server misconfiguration, never a client error.
//!
//! # Example
//!
//! ```ignore
//! let dispatcher = GrantDispatcher::standard(&stores, &config, hasher);
//! dispatcher.validate()?;
//!
//! let response = dispatcher.exchange(&request, basic_auth).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::AuthResult;
use crate::config::{AuthConfig, RetryConfig};
use crate::error::AuthError;
use crate::oauth::client_auth::{ClientAuthenticator, ClientCredentials};
use crate::oauth::pkce::{PkceChallenge, PkceVerifier};
use crate::oauth::rotation::{
    RefreshRotationGuard, ensure_authorization_valid, ensure_can_sign_in, narrow_scopes,
    reject_reuse,
};
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::retry::with_retry;
use crate::secret::SecretHasher;
use crate::storage::{AuthorizationStorage, RedeemOutcome, Stores, TokenStorage, UserStorage};
use crate::token::{TokenGrant, TokenIssuer, TokenPair, find_by_reference};
use crate::types::{Client, GrantType, TokenKind, TokenStatus, permissions};

const CODE_INVALID: &str = "authorization code no longer valid";

/// Handles one grant type for an already authenticated client.
#[async_trait]
pub trait GrantHandler: Send + Sync {
    /// The grant type this handler serves.
    fn grant_type(&self) -> GrantType;

    /// Exchanges the grant for tokens.
    ///
    /// # Errors
    ///
    /// Returns a protocol error describing why the grant was refused, or a
    /// storage error.
    async fn exchange(&self, client: &Client, request: &TokenRequest) -> AuthResult<TokenPair>;
}

/// Routes token requests to their grant handler.
#[derive(Clone)]
pub struct GrantDispatcher {
    authenticator: ClientAuthenticator,
    enabled: Vec<GrantType>,
    handlers: HashMap<GrantType, Arc<dyn GrantHandler>>,
}

impl GrantDispatcher {
    /// Creates a dispatcher with no handlers.
    #[must_use]
    pub fn new(authenticator: ClientAuthenticator, enabled: Vec<GrantType>) -> Self {
        Self {
            authenticator,
            enabled,
            handlers: HashMap::new(),
        }
    }

    /// Creates a dispatcher with the built-in handler of every enabled grant.
    #[must_use]
    pub fn standard(stores: &Stores, config: &AuthConfig, hasher: SecretHasher) -> Self {
        let issuer = TokenIssuer::new(&config.oauth);
        let authenticator = ClientAuthenticator::new(stores.clients.clone(), hasher);
        let mut dispatcher = Self::new(authenticator, config.oauth.enabled_grant_types());

        for grant_type in config.oauth.enabled_grant_types() {
            let handler: Arc<dyn GrantHandler> = match grant_type {
                GrantType::AuthorizationCode => Arc::new(AuthorizationCodeGrant::new(
                    stores.tokens.clone(),
                    stores.authorizations.clone(),
                    stores.users.clone(),
                    issuer.clone(),
                    config.retry.clone(),
                )),
                GrantType::RefreshToken => Arc::new(RefreshTokenGrant::new(
                    RefreshRotationGuard::new(
                        stores.tokens.clone(),
                        stores.authorizations.clone(),
                        stores.users.clone(),
                        issuer.clone(),
                        config.retry.clone(),
                    ),
                )),
                GrantType::ClientCredentials => Arc::new(ClientCredentialsGrant::new(
                    stores.tokens.clone(),
                    issuer.clone(),
                    config.retry.clone(),
                    Arc::new(config.clone()),
                )),
            };
            dispatcher = dispatcher.with_handler(handler);
        }
        dispatcher
    }

    /// Registers a handler, replacing any previous one for the same grant.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn GrantHandler>) -> Self {
        self.handlers.insert(handler.grant_type(), handler);
        self
    }

    /// Checks that every enabled grant type has a handler.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Misconfiguration` naming the first grant without one.
    pub fn validate(&self) -> AuthResult<()> {
        match self.enabled.iter().find(|g| !self.handlers.contains_key(g)) {
            Some(missing) => Err(AuthError::misconfiguration(format!(
                "grant type '{missing}' is enabled but has no handler"
            ))),
            None => Ok(()),
        }
    }

    /// Returns `true` if the server accepts this grant type.
    #[must_use]
    pub fn is_enabled(&self, grant_type: GrantType) -> bool {
        self.enabled.contains(&grant_type)
    }

    /// Full token endpoint exchange: grant type check, client
    /// authentication, permission checks and dispatch.
    ///
    /// `basic` carries credentials from the Authorization header; they win
    /// over the body.
    ///
    /// # Errors
    ///
    /// - `unsupported_grant_type` for unknown or disabled grant types
    /// - `invalid_client` when authentication fails
    /// - `unauthorized_client` when the client lacks the token endpoint or
    ///   grant type permission
    /// - whatever the grant handler reports
    pub async fn exchange(
        &self,
        request: &TokenRequest,
        basic: Option<(String, String)>,
    ) -> AuthResult<TokenResponse> {
        let grant_type: GrantType = request.grant_type.parse()?;
        if !self.is_enabled(grant_type) {
            return Err(AuthError::unsupported_grant_type(&request.grant_type));
        }

        let credentials = ClientCredentials::resolve(
            basic,
            request.client_id.as_deref(),
            request.client_secret.as_deref(),
        )?;
        let client = self.authenticator.authenticate(&credentials).await?;

        if !client.has_permission(permissions::ENDPOINT_TOKEN) {
            return Err(AuthError::unauthorized_client(
                "The client is not allowed to use the token endpoint",
            ));
        }
        if !client.is_grant_type_allowed(grant_type) {
            return Err(AuthError::unauthorized_client(format!(
                "The client is not allowed to use the '{grant_type}' grant"
            )));
        }

        let pair = self.dispatch(grant_type, &client, request).await?;

        tracing::info!(
            client_id = %client.client_id,
            grant_type = %grant_type,
            auth_method = %credentials.method,
            subject = pair.access.token.subject.as_deref().unwrap_or_default(),
            "Token issued"
        );
        Ok(pair.into_response())
    }

    /// Invokes the handler registered for `grant_type`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Misconfiguration` if no handler is registered.
    pub async fn dispatch(
        &self,
        grant_type: GrantType,
        client: &Client,
        request: &TokenRequest,
    ) -> AuthResult<TokenPair> {
        let Some(handler) = self.handlers.get(&grant_type) else {
            tracing::error!(
                grant_type = %grant_type,
                client_id = %client.client_id,
                "Invariant violated: grant type reached the dispatcher without a handler"
            );
            return Err(AuthError::misconfiguration(format!(
                "no handler registered for grant type '{grant_type}'"
            )));
        };
        handler.exchange(client, request).await
    }
}

impl std::fmt::Debug for GrantDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantDispatcher")
            .field("enabled", &self.enabled)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// authorization_code
// =============================================================================

/// Exchanges an authorization code for an access and refresh token pair.
pub struct AuthorizationCodeGrant {
    tokens: Arc<dyn TokenStorage>,
    authorizations: Arc<dyn AuthorizationStorage>,
    users: Arc<dyn UserStorage>,
    issuer: TokenIssuer,
    retry: RetryConfig,
}

impl AuthorizationCodeGrant {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn TokenStorage>,
        authorizations: Arc<dyn AuthorizationStorage>,
        users: Arc<dyn UserStorage>,
        issuer: TokenIssuer,
        retry: RetryConfig,
    ) -> Self {
        Self {
            tokens,
            authorizations,
            users,
            issuer,
            retry,
        }
    }
}

#[async_trait]
impl GrantHandler for AuthorizationCodeGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::AuthorizationCode
    }

    async fn exchange(&self, client: &Client, request: &TokenRequest) -> AuthResult<TokenPair> {
        let reference = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_request("code is required"))?;

        let code = find_by_reference(self.tokens.as_ref(), reference)
            .await?
            .filter(|t| t.kind == TokenKind::AuthorizationCode && t.client_id == client.id)
            .ok_or_else(|| AuthError::invalid_grant(CODE_INVALID))?;

        match code.status {
            TokenStatus::Revoked => return Err(AuthError::invalid_grant(CODE_INVALID)),
            TokenStatus::Redeemed => {
                return Err(reject_reuse(self.tokens.as_ref(), &self.retry, &code).await);
            }
            TokenStatus::Valid => {}
        }
        if code.is_expired() {
            return Err(AuthError::invalid_grant(CODE_INVALID));
        }
        ensure_authorization_valid(self.authorizations.as_ref(), &code, CODE_INVALID).await?;

        if let Some(expected) = code.redirect_uri.as_deref()
            && request.redirect_uri.as_deref() != Some(expected)
        {
            return Err(AuthError::invalid_grant("redirect_uri does not match"));
        }

        if let Some(challenge) = code.code_challenge.clone() {
            let verifier = request
                .code_verifier
                .clone()
                .ok_or_else(|| AuthError::invalid_grant("code_verifier is required"))?;
            PkceChallenge::new(challenge)?.verify(&PkceVerifier::new(verifier)?)?;
        }

        let subject = code
            .subject
            .as_deref()
            .ok_or_else(|| AuthError::invalid_grant(CODE_INVALID))?;
        ensure_can_sign_in(self.users.as_ref(), subject).await?;

        let grant = TokenGrant::from_token(&code);
        let tokens = self.tokens.as_ref();
        let issuer = &self.issuer;
        let grant = &grant;
        let id = code.id;
        let (outcome, pair) = with_retry(&self.retry, "code_exchange", || {
            let pair = issuer.pair(grant);
            async move {
                let outcome = tokens.redeem_and_issue(id, &pair.tokens()).await?;
                Ok((outcome, pair))
            }
        })
        .await?;

        match outcome {
            RedeemOutcome::Redeemed => Ok(pair),
            RedeemOutcome::AlreadyConsumed => {
                Err(reject_reuse(self.tokens.as_ref(), &self.retry, &code).await)
            }
        }
    }
}

// =============================================================================
// refresh_token
// =============================================================================

/// Rotates a refresh token through the [`RefreshRotationGuard`].
pub struct RefreshTokenGrant {
    guard: RefreshRotationGuard,
}

impl RefreshTokenGrant {
    #[must_use]
    pub fn new(guard: RefreshRotationGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl GrantHandler for RefreshTokenGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::RefreshToken
    }

    async fn exchange(&self, client: &Client, request: &TokenRequest) -> AuthResult<TokenPair> {
        let reference = request
            .refresh_token
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| AuthError::invalid_request("refresh_token is required"))?;

        let requested = request.requested_scopes();
        self.guard
            .rotate(client, reference, requested.as_deref())
            .await
    }
}

// =============================================================================
// client_credentials
// =============================================================================

/// Issues an access token to a confidential client acting on its own behalf.
pub struct ClientCredentialsGrant {
    tokens: Arc<dyn TokenStorage>,
    issuer: TokenIssuer,
    retry: RetryConfig,
    config: Arc<AuthConfig>,
}

impl ClientCredentialsGrant {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn TokenStorage>,
        issuer: TokenIssuer,
        retry: RetryConfig,
        config: Arc<AuthConfig>,
    ) -> Self {
        Self {
            tokens,
            issuer,
            retry,
            config,
        }
    }
}

#[async_trait]
impl GrantHandler for ClientCredentialsGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::ClientCredentials
    }

    async fn exchange(&self, client: &Client, request: &TokenRequest) -> AuthResult<TokenPair> {
        if !client.is_confidential() {
            return Err(AuthError::unauthorized_client(
                "client_credentials requires a confidential client",
            ));
        }

        let granted = client.granted_scopes();
        let scopes = match request.requested_scopes().filter(|s| !s.is_empty()) {
            Some(requested) => narrow_scopes(&granted, &requested)?,
            None => granted,
        };

        let audiences = self.config.audiences_for(&scopes);
        let grant = TokenGrant {
            subject: None,
            client_id: client.id,
            authorization_id: None,
            scopes,
            audiences,
        };

        let tokens = self.tokens.as_ref();
        let issuer = &self.issuer;
        let grant = &grant;
        with_retry(&self.retry, "client_credentials", || {
            let pair = issuer.access_only(grant);
            async move {
                tokens.create(&pair.access.token).await?;
                Ok(pair)
            }
        })
        .await
    }
}
