//! OAuth 2.0 authorization server implementation.
//!
//! - [`authorize`] - Authorization endpoint flow (sign-in, consent, code)
//! - [`client_auth`] - Client authentication at the token endpoint
//! - [`grants`] - Grant dispatch and the built-in grant handlers
//! - [`rotation`] - Refresh token rotation with reuse detection
//! - [`pkce`] - PKCE challenge/verifier implementation
//! - [`principal`] - Signed-in principal and claim destinations
//! - [`token`] - Token endpoint wire types
//!
//! # Example
//!
//! ```ignore
//! use warden_auth::oauth::{AuthorizationService, AuthorizeOutcome, GrantDispatcher};
//!
//! match service.authorize(&request, session_id).await? {
//!     AuthorizeOutcome::SignedIn(granted) => redirect(granted.redirect_url()?),
//!     AuthorizeOutcome::Forbidden(denied) => redirect(denied.redirect_url()?),
//!     AuthorizeOutcome::ChallengeIssued { login_url } => redirect(login_url),
//! }
//!
//! let response = dispatcher.exchange(&token_request, basic_auth).await?;
//! ```

pub mod authorize;
pub mod client_auth;
pub mod grants;
pub mod pkce;
pub mod principal;
pub mod rotation;
pub mod token;

pub use authorize::{
    AuthorizationDenied, AuthorizationGranted, AuthorizationService, AuthorizeOutcome,
    AuthorizeRequest,
};
pub use client_auth::{
    ClientAuthenticator, ClientCredentials, INVALID_CLIENT_DESCRIPTION, TokenEndpointAuthMethod,
    parse_basic_auth,
};
pub use grants::{
    AuthorizationCodeGrant, ClientCredentialsGrant, GrantDispatcher, GrantHandler,
    RefreshTokenGrant,
};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use principal::{Claim, ClaimDestination, Principal};
pub use rotation::{RefreshRotationGuard, TOKEN_THEFT_DESCRIPTION};
pub use token::{ErrorResponse, TokenRequest, TokenResponse, format_scope, parse_scope};
