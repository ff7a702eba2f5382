//! Resolution of presented reference tokens.
//!
//! # Security Considerations
//!
//! - References are looked up by hash only
//! - Callers never learn why a token is inactive (expired vs revoked vs
//!   unknown vs wrong kind)

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::TokenStorage;
use crate::types::{Token, TokenKind};

/// Looks up a reference regardless of its state.
///
/// # Errors
///
/// Returns an error if the storage operation fails.
pub async fn find_by_reference(
    tokens: &dyn TokenStorage,
    reference: &str,
) -> AuthResult<Option<Token>> {
    if reference.is_empty() {
        return Ok(None);
    }
    tokens
        .find_by_reference_hash(&Token::hash_reference(reference))
        .await
}

/// Resolves a bearer access token that is valid and unexpired.
///
/// # Errors
///
/// Returns `AuthError::InvalidToken` when the token is unknown, of another
/// kind, expired, redeemed or revoked.
pub async fn resolve_access_token(tokens: &dyn TokenStorage, reference: &str) -> AuthResult<Token> {
    match find_by_reference(tokens, reference).await? {
        Some(token) if token.kind == TokenKind::Access && token.is_active() => Ok(token),
        _ => Err(AuthError::invalid_token("The access token is invalid")),
    }
}
