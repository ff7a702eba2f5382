//! # warden-auth
//!
//! OAuth 2.0 / OpenID Connect token issuance and lifecycle engine.
//!
//! This crate provides:
//! - The authorization code, refresh token and client credentials grants
//! - Refresh token rotation with reuse (theft) detection
//! - Client authentication with Argon2id-hashed secrets
//! - PKCE enforcement driven by per-client policy
//! - Keyset pagination over clients and tokens
//!
//! Tokens are opaque references; only their SHA-256 hashes are stored.
//!
//! ## Modules
//!
//! - [`config`] - Engine configuration
//! - [`oauth`] - Authorization and token endpoint logic
//! - [`token`] - Minting and resolution of reference tokens
//! - [`registry`] - Client registration and policy management
//! - [`storage`] - Storage traits and the in-memory backend
//! - [`pagination`] - Keyset pagination engine
//! - [`secret`] - Client secret generation and hashing
//! - [`middleware`] - Axum extractors and error rendering
//! - [`http`] - Axum handlers and router

pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod oauth;
pub mod pagination;
pub mod registry;
pub mod retry;
pub mod secret;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use http::{OAuthState, router};
pub use middleware::{AdminAuth, AuthState, BearerAuth};
pub use oauth::{
    AuthorizationService, AuthorizeOutcome, AuthorizeRequest, ClientAuthenticator,
    GrantDispatcher, GrantHandler, RefreshRotationGuard, TokenRequest, TokenResponse,
};
pub use pagination::{Keyset, KeysetQuery, Page, PageRequest};
pub use registry::ClientRegistry;
pub use secret::SecretHasher;
pub use storage::{
    AuthorizationStorage, ClientChange, ClientStorage, InMemoryAuthStorage, ModifiedClient,
    RedeemOutcome, SessionStorage, Stores, TenantDirectory, TokenStorage, UserStorage,
};
pub use types::{
    Authorization, Client, ClientPolicy, ClientType, ConsentType, GrantType, Token, TokenKind,
    TokenStatus, UserAccount,
};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use warden_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::http::{OAuthState, router};
    pub use crate::oauth::{AuthorizationService, GrantDispatcher, RefreshRotationGuard};
    pub use crate::registry::ClientRegistry;
    pub use crate::storage::{
        AuthorizationStorage, ClientStorage, SessionStorage, Stores, TenantDirectory,
        TokenStorage, UserStorage,
    };
    pub use crate::types::{Client, ClientPolicy, GrantType, Token, TokenKind, TokenStatus};
}
