//! Authorization endpoint: request validation, sign-in, consent and code
//! issuance.
//!
//! # Flow
//!
//! ```text
//! RequestReceived ──▶ SignedIn         (code issued, redirect to client)
//!        │
//!        ├─────────▶ Forbidden        (error redirected to client)
//!        │
//!        └─────────▶ ChallengeIssued  (redirect to login, request preserved)
//! ```
//!
//! Problems that make the redirect URI untrustworthy (unknown client,
//! unregistered redirect URI) are returned as errors and must be shown to
//! the user instead of redirected.
//!
//! # Security Requirements
//!
//! - Only S256 challenges are accepted
//! - A client whose policy requires PKCE is refused before any session
//!   lookup happens

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::oauth::pkce::{PkceChallenge, PkceChallengeMethod};
use crate::oauth::principal::Principal;
use crate::oauth::token::parse_scope;
use crate::retry::with_retry;
use crate::storage::Stores;
use crate::token::{TokenGrant, TokenIssuer};
use crate::types::{Authorization, Client, ConsentType, GrantType, UserAccount, permissions};

/// Authorization request parameters, from the query string or a form body.
///
/// # Example
///
/// ```ignore
/// GET /connect/authorize?
///   response_type=code
///   &client_id=my-app
///   &redirect_uri=https://app.example.com/callback
///   &scope=openid email
///   &state=abc123xyz
///   &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM
///   &code_challenge_method=S256
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Must exactly match one of the registered redirect URIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// Requested scopes (space-separated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Echoed back to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// `none` forbids any interactive prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl AuthorizeRequest {
    /// Returns `true` if the request forbids interactive prompts.
    #[must_use]
    pub fn forbids_prompt(&self) -> bool {
        self.prompt
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|v| v == "none"))
    }

    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.as_deref().map(parse_scope).unwrap_or_default()
    }

    /// Re-encodes the request as a query string for replay after login.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        let params = [
            ("response_type", &self.response_type),
            ("client_id", &self.client_id),
            ("redirect_uri", &self.redirect_uri),
            ("scope", &self.scope),
            ("state", &self.state),
            ("code_challenge", &self.code_challenge),
            ("code_challenge_method", &self.code_challenge_method),
            ("prompt", &self.prompt),
        ];
        for (name, value) in params {
            if let Some(value) = value {
                query.append_pair(name, value);
            }
        }
        query.finish()
    }
}

/// A completed sign-in: the code to hand to the client.
#[derive(Debug, Clone)]
pub struct AuthorizationGranted {
    pub principal: Principal,
    pub authorization_id: uuid::Uuid,
    pub code: String,
    pub redirect_uri: String,
    pub state: Option<String>,
}

impl AuthorizationGranted {
    /// Builds the redirect URL carrying `code` and `state`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` if the redirect URI does not parse.
    pub fn redirect_url(&self) -> AuthResult<String> {
        let mut url = parse_redirect(&self.redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(state) = &self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// A refused request whose error is redirected to the client.
#[derive(Debug, Clone)]
pub struct AuthorizationDenied {
    pub error: AuthError,
    pub redirect_uri: String,
    pub state: Option<String>,
}

impl AuthorizationDenied {
    /// Builds the redirect URL carrying `error`, `error_description` and
    /// `state`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` if the redirect URI does not parse.
    pub fn redirect_url(&self) -> AuthResult<String> {
        let mut url = parse_redirect(&self.redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", self.error.oauth_error_code());
            pairs.append_pair("error_description", &self.error.public_description());
            if let Some(state) = &self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

fn parse_redirect(redirect_uri: &str) -> AuthResult<url::Url> {
    url::Url::parse(redirect_uri)
        .map_err(|e| AuthError::invalid_request(format!("invalid redirect_uri: {e}")))
}

/// Terminal state of an authorization request.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    SignedIn(AuthorizationGranted),
    Forbidden(AuthorizationDenied),
    /// The user must sign in (or step up) first; `login_url` carries the
    /// original request in `return_to`.
    ChallengeIssued { login_url: String },
}

/// Runs the authorization endpoint.
#[derive(Clone)]
pub struct AuthorizationService {
    stores: Stores,
    issuer: TokenIssuer,
    config: Arc<AuthConfig>,
}

impl AuthorizationService {
    #[must_use]
    pub fn new(stores: Stores, config: Arc<AuthConfig>) -> Self {
        Self {
            issuer: TokenIssuer::new(&config.oauth),
            stores,
            config,
        }
    }

    /// Processes an authorization request for the browser session
    /// `session_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` when the client is unknown or
    /// inactive, or the redirect URI is missing or unregistered. Storage
    /// errors are returned as-is.
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        session_id: Option<&str>,
    ) -> AuthResult<AuthorizeOutcome> {
        let client_id = request
            .client_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_request("client_id is required"))?;

        let client = match self.stores.clients.find_by_client_id(client_id).await? {
            Some(client) if client.active => client,
            _ => {
                tracing::info!(client_id, "Authorization request for unknown or inactive client");
                return Err(AuthError::invalid_request("unknown or inactive client"));
            }
        };

        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .filter(|uri| client.is_redirect_uri_allowed(uri))
            .ok_or_else(|| AuthError::invalid_request("redirect_uri is not registered"))?
            .to_string();

        let deny = |error: AuthError| -> AuthResult<AuthorizeOutcome> {
            tracing::info!(
                client_id = %client.client_id,
                error = error.oauth_error_code(),
                "Authorization request refused"
            );
            Ok(AuthorizeOutcome::Forbidden(AuthorizationDenied {
                error,
                redirect_uri: redirect_uri.clone(),
                state: request.state.clone(),
            }))
        };

        if let Err(error) = check_request(&client, request) {
            return deny(error);
        }

        // PKCE is decided before the session is looked at
        if client.policy.require_pkce && request.code_challenge.is_none() {
            return deny(AuthError::invalid_request(
                "PKCE is required for this client",
            ));
        }

        let Some((session_mfa, user)) = self.resolve_session(session_id).await? else {
            if request.forbids_prompt() {
                return deny(AuthError::login_required("the user is not signed in"));
            }
            return Ok(self.challenge(request));
        };

        if client.policy.require_email_verification && !user.email_verified {
            return deny(AuthError::access_denied(
                "the user's email address must be verified",
            ));
        }
        if client.policy.require_mfa && !session_mfa {
            if request.forbids_prompt() {
                return deny(AuthError::login_required(
                    "a second factor is required for this client",
                ));
            }
            return Ok(self.challenge(request));
        }

        let scopes = request.scopes();
        let existing = self
            .stores
            .authorizations
            .find_permanent(&user.subject, client.id)
            .await?
            .into_iter()
            .find(|a| a.covers(&scopes));

        if existing.is_none() && client.consent_type == ConsentType::External {
            return deny(AuthError::consent_required(
                "consent must be granted by an administrator",
            ));
        }

        let audiences = self.config.audiences_for(&scopes);
        let principal = Principal::new(&user, scopes, audiences);

        let authorization = match existing {
            Some(authorization) => authorization,
            None => {
                let authorization =
                    Authorization::permanent(&user.subject, client.id, principal.scopes.clone());
                let authorizations = self.stores.authorizations.as_ref();
                let created = &authorization;
                with_retry(&self.config.retry, "create_authorization", || async move {
                    authorizations.create(created).await
                })
                .await?;
                tracing::info!(
                    client_id = %client.client_id,
                    subject = %user.subject,
                    authorization_id = %authorization.id,
                    "Permanent authorization created"
                );
                authorization
            }
        };

        let grant = TokenGrant {
            subject: Some(principal.subject.clone()),
            client_id: client.id,
            authorization_id: Some(authorization.id),
            scopes: principal.scopes.clone(),
            audiences: principal.audiences.clone(),
        };
        let tokens = self.stores.tokens.as_ref();
        let issuer = &self.issuer;
        let grant = &grant;
        let redirect = redirect_uri.as_str();
        let challenge = request.code_challenge.clone();
        let code = with_retry(&self.config.retry, "issue_authorization_code", || {
            let code = issuer.authorization_code(grant, redirect, challenge.clone());
            async move {
                tokens.create(&code.token).await?;
                Ok(code)
            }
        })
        .await?;

        tracing::info!(
            client_id = %client.client_id,
            subject = %principal.subject,
            "Authorization code issued"
        );

        Ok(AuthorizeOutcome::SignedIn(AuthorizationGranted {
            principal,
            authorization_id: authorization.id,
            code: code.reference,
            redirect_uri,
            state: request.state.clone(),
        }))
    }

    /// Returns `(mfa_authenticated, user)` for a live session whose user may
    /// sign in.
    async fn resolve_session(
        &self,
        session_id: Option<&str>,
    ) -> AuthResult<Option<(bool, UserAccount)>> {
        let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let Some(session) = self.stores.sessions.find(session_id).await? else {
            return Ok(None);
        };
        match self.stores.users.find_by_subject(&session.subject).await? {
            Some(user) if user.can_sign_in() => Ok(Some((session.mfa_authenticated, user))),
            _ => Ok(None),
        }
    }

    fn challenge(&self, request: &AuthorizeRequest) -> AuthorizeOutcome {
        let return_to = format!("/connect/authorize?{}", request.to_query_string());
        let separator = if self.config.login_url.contains('?') {
            '&'
        } else {
            '?'
        };
        let encoded: String = url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect();
        AuthorizeOutcome::ChallengeIssued {
            login_url: format!("{}{separator}return_to={encoded}", self.config.login_url),
        }
    }
}

/// Checks that can be answered from the request and the client alone.
fn check_request(client: &Client, request: &AuthorizeRequest) -> AuthResult<()> {
    match request.response_type.as_deref() {
        Some("code") => {}
        Some(other) => return Err(AuthError::unsupported_response_type(other)),
        None => return Err(AuthError::invalid_request("response_type is required")),
    }

    if !client.has_permission(permissions::ENDPOINT_AUTHORIZATION)
        || !client.is_grant_type_allowed(GrantType::AuthorizationCode)
    {
        return Err(AuthError::unauthorized_client(
            "The client is not allowed to use the authorization endpoint",
        ));
    }

    if let Some(scope) = request.scopes().iter().find(|s| !client.is_scope_allowed(s)) {
        return Err(AuthError::invalid_scope(format!(
            "scope '{scope}' is not allowed for this client"
        )));
    }

    if let Some(challenge) = &request.code_challenge {
        // Absent method defaults to `plain`, which is refused
        PkceChallengeMethod::parse(request.code_challenge_method.as_deref().unwrap_or("plain"))?;
        PkceChallenge::new(challenge.clone())?;
    }
    Ok(())
}
