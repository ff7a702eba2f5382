//! Authorization (consent) storage trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::Authorization;

/// Storage operations for authorizations.
#[async_trait]
pub trait AuthorizationStorage: Send + Sync {
    /// Stores a new authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn create(&self, authorization: &Authorization) -> AuthResult<()>;

    /// Finds an authorization by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Authorization>>;

    /// Returns the valid permanent authorizations of a subject for a client,
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_permanent(&self, subject: &str, client_id: Uuid)
    -> AuthResult<Vec<Authorization>>;
}
