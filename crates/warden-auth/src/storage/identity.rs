//! Read-only views of collaborator subsystems.
//!
//! Accounts, browser sessions and tenants are managed elsewhere; the engine
//! only needs to look them up.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::{Session, UserAccount};

/// Resource owner accounts.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Finds an account by subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_subject(&self, subject: &str) -> AuthResult<Option<UserAccount>>;
}

/// Browser sessions established by the login UI.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Finds a live session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>>;

    /// Ends a session. Ending an unknown session is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn terminate(&self, session_id: &str) -> AuthResult<()>;
}

/// Tenants that may own clients.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Returns `true` if the tenant exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn tenant_exists(&self, tenant_id: Uuid) -> AuthResult<bool>;
}
