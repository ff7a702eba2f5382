//! Client storage trait.
//!
//! Defines the interface for OAuth client persistence operations.
//! Implementations are provided by storage backends (in-memory, PostgreSQL).

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::pagination::{KeysetQuery, Page};
use crate::types::Client;

/// Edit applied to a locked client by [`ClientStorage::modify`].
///
/// It may run more than once when the unit is retried.
pub type ClientChange<'a> = &'a (dyn Fn(&mut Client) -> AuthResult<()> + Send + Sync);

/// Outcome of [`ClientStorage::modify`].
#[derive(Debug, Clone)]
pub struct ModifiedClient {
    pub client: Client,
    /// Tokens revoked because the client ended up inactive.
    pub revoked_tokens: u64,
}

// =============================================================================
// Client Storage Trait
// =============================================================================

/// Storage operations for OAuth 2.0 clients.
///
/// # Example
///
/// ```ignore
/// use warden_auth::storage::ClientStorage;
///
/// async fn example(storage: &impl ClientStorage) {
///     if let Some(client) = storage.find_by_client_id("my-app").await? {
///         println!("Found client: {}", client.display_name);
///     }
/// }
/// ```
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Find a client by its OAuth client_id, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>>;

    /// Find a client by its internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Client>>;

    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Conflict` if the client_id is already registered.
    async fn create(&self, client: &Client) -> AuthResult<Client>;

    /// Read-modify-write of one client as a single atomic unit.
    ///
    /// The stored client is locked against concurrent writers, `change` is
    /// applied to it and the result is written back. `id` and `client_id`
    /// are never rewritten. When the client is inactive after the change,
    /// every outstanding token of the client is revoked in the same unit.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if no client has `client_id`, or the
    /// error returned by `change`. Nothing is written in either case.
    async fn modify(&self, client_id: &str, change: ClientChange<'_>)
    -> AuthResult<ModifiedClient>;

    /// Delete a client together with its authorizations and tokens.
    ///
    /// The cascade is applied atomically.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the client doesn't exist.
    async fn delete(&self, id: Uuid) -> AuthResult<()>;

    /// Return one keyset page of clients, optionally limited to a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn page(&self, tenant_id: Option<Uuid>, query: &KeysetQuery)
    -> AuthResult<Page<Client>>;
}
