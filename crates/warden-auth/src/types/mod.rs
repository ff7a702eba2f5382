//! Domain types shared by the engine and its storage backends.
//!
//! - [`Client`] - OAuth 2.0 client registration with its [`ClientPolicy`]
//! - [`Authorization`] - recorded consent of a subject for a client
//! - [`Token`] - authorization code, access token or refresh token
//! - [`UserAccount`] / [`Session`] - resource owner collaborators

pub mod authorization;
pub mod client;
pub mod token;
pub mod user;

pub use authorization::{Authorization, AuthorizationStatus, AuthorizationType};
pub use client::{
    Client, ClientPolicy, ClientType, ClientValidationError, ConsentType, GrantType, permissions,
};
pub use token::{Token, TokenFilter, TokenKind, TokenStatus};
pub use user::{Session, UserAccount};
