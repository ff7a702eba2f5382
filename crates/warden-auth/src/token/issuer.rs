//! Minting of opaque reference tokens.
//!
//! The issuer only builds [`Token`] records and their references; storing
//! them is up to the caller so that a redemption and its replacements can be
//! written as one unit.
//!
//! # Usage
//!
//! ```ignore
//! use warden_auth::token::{TokenGrant, TokenIssuer};
//!
//! let issuer = TokenIssuer::new(&config.oauth);
//! let pair = issuer.pair(&TokenGrant::from_token(&code));
//! tokens.redeem_and_issue(code.id, &pair.tokens()).await?;
//! ```

use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::OAuthConfig;
use crate::oauth::token::{TokenResponse, format_scope};
use crate::types::{Token, TokenKind, TokenStatus};

/// What a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub subject: Option<String>,
    /// Internal id of the client.
    pub client_id: Uuid,
    pub authorization_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub audiences: Vec<String>,
}

impl TokenGrant {
    /// Carries over subject, client, authorization, scopes and audiences.
    #[must_use]
    pub fn from_token(token: &Token) -> Self {
        Self {
            subject: token.subject.clone(),
            client_id: token.client_id,
            authorization_id: token.authorization_id,
            scopes: token.scopes.clone(),
            audiences: token.audiences.clone(),
        }
    }
}

/// A freshly minted token and the reference handed to the client.
///
/// The reference exists only here; the store keeps its hash.
#[derive(Clone)]
pub struct IssuedToken {
    pub reference: String,
    pub token: Token,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("reference", &"***")
            .field("token", &self.token)
            .finish()
    }
}

/// Access token plus an optional refresh token.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: Option<IssuedToken>,
}

impl TokenPair {
    /// Token records to persist.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        std::iter::once(self.access.token.clone())
            .chain(self.refresh.iter().map(|r| r.token.clone()))
            .collect()
    }

    /// Builds the token endpoint response.
    #[must_use]
    pub fn into_response(self) -> TokenResponse {
        let expires_in = (self.access.token.expires_at - self.access.token.created_at)
            .whole_seconds()
            .max(0) as u64;
        let response = TokenResponse::new(
            self.access.reference,
            expires_in,
            format_scope(&self.access.token.scopes),
        );
        match self.refresh {
            Some(refresh) => response.with_refresh_token(refresh.reference),
            None => response,
        }
    }
}

/// Mints codes, access tokens and refresh tokens with configured lifetimes.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    code_lifetime: Duration,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: &OAuthConfig) -> Self {
        Self {
            code_lifetime: config.authorization_code_lifetime,
            access_lifetime: config.access_token_lifetime,
            refresh_lifetime: config.refresh_token_lifetime,
        }
    }

    /// Mints a single-use authorization code bound to a redirect URI and an
    /// optional S256 challenge.
    #[must_use]
    pub fn authorization_code(
        &self,
        grant: &TokenGrant,
        redirect_uri: &str,
        code_challenge: Option<String>,
    ) -> IssuedToken {
        let mut issued = self.mint(TokenKind::AuthorizationCode, self.code_lifetime, grant);
        issued.token.redirect_uri = Some(redirect_uri.to_string());
        issued.token.code_challenge = code_challenge;
        issued
    }

    /// Mints an access token and a refresh token.
    ///
    /// The refresh lifetime starts now, so every rotation extends it.
    #[must_use]
    pub fn pair(&self, grant: &TokenGrant) -> TokenPair {
        TokenPair {
            access: self.mint(TokenKind::Access, self.access_lifetime, grant),
            refresh: Some(self.mint(TokenKind::Refresh, self.refresh_lifetime, grant)),
        }
    }

    /// Mints an access token alone.
    #[must_use]
    pub fn access_only(&self, grant: &TokenGrant) -> TokenPair {
        TokenPair {
            access: self.mint(TokenKind::Access, self.access_lifetime, grant),
            refresh: None,
        }
    }

    fn mint(&self, kind: TokenKind, lifetime: Duration, grant: &TokenGrant) -> IssuedToken {
        let reference = Token::generate_reference();
        let now = OffsetDateTime::now_utc();

        IssuedToken {
            token: Token {
                id: Uuid::new_v4(),
                reference_hash: Token::hash_reference(&reference),
                subject: grant.subject.clone(),
                client_id: grant.client_id,
                authorization_id: grant.authorization_id,
                kind,
                status: TokenStatus::Valid,
                scopes: grant.scopes.clone(),
                audiences: grant.audiences.clone(),
                code_challenge: None,
                redirect_uri: None,
                created_at: now,
                expires_at: now + lifetime,
                redeemed_at: None,
            },
            reference,
        }
    }
}
