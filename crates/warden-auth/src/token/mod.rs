//! Opaque reference token handling.
//!
//! This module provides:
//!
//! - Minting of authorization codes, access tokens and refresh tokens
//! - Resolution of presented references against the token store

pub mod introspection;
pub mod issuer;

pub use introspection::{find_by_reference, resolve_access_token};
pub use issuer::{IssuedToken, TokenGrant, TokenIssuer, TokenPair};
