//! Token storage trait.
//!
//! # Security Considerations
//!
//! - Tokens are addressed by the SHA-256 hash of their reference only
//! - Redemption is a compare-and-swap on the status; the number of affected
//!   rows decides who won
//! - Redeeming and inserting the replacement tokens is one atomic unit
//! - Revoking after a replay is one atomic unit

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::pagination::{KeysetQuery, Page};
use crate::types::{Token, TokenFilter};

/// Result of a redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// This call moved the token from `valid` to `redeemed`.
    Redeemed,
    /// The token was no longer `valid`; nothing was written.
    AlreadyConsumed,
}

/// Storage trait for tokens of every kind.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Stores a new token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be stored (e.g., duplicate hash,
    /// storage unavailable).
    async fn create(&self, token: &Token) -> AuthResult<()>;

    /// Finds a token by the hash of its reference.
    ///
    /// Returns tokens regardless of status or expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_reference_hash(&self, reference_hash: &str) -> AuthResult<Option<Token>>;

    /// Atomically redeems a single-use token and stores its replacements.
    ///
    /// The status moves `valid → redeemed` only if it is still `valid`. When
    /// it is not, nothing is inserted and [`RedeemOutcome::AlreadyConsumed`]
    /// is returned. A failure leaves neither change applied.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transient` for retryable failures.
    async fn redeem_and_issue(&self, id: Uuid, issued: &[Token]) -> AuthResult<RedeemOutcome>;

    /// Revokes one token. Returns `false` if it was already revoked or absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke(&self, id: Uuid) -> AuthResult<bool>;

    /// Revokes every non-revoked token of a subject, of every kind.
    ///
    /// Returns the number of tokens revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_by_subject(&self, subject: &str) -> AuthResult<u64>;

    /// Handles a replayed single-use token as one atomic unit: revokes the
    /// token itself, every token of its subject and the authorization it was
    /// issued under. A failure leaves none of these changes applied.
    ///
    /// Returns the number of tokens revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transient` for retryable failures.
    async fn revoke_on_reuse(&self, token: &Token) -> AuthResult<u64>;

    /// Deletes tokens that expired before `before`.
    ///
    /// Redeemed tokens stay until they expire so replays keep being detected.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn prune(&self, before: OffsetDateTime) -> AuthResult<u64>;

    /// Returns one keyset page of tokens matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn page(&self, filter: &TokenFilter, query: &KeysetQuery) -> AuthResult<Page<Token>>;
}
