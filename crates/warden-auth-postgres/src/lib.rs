//! PostgreSQL storage backend for Warden.
//!
//! Provides persistent storage for:
//!
//! - OAuth clients (`warden_clients`)
//! - Authorizations (`warden_authorizations`)
//! - Authorization codes, access and refresh tokens (`warden_tokens`)
//!
//! and read-only lookups of the identity subsystem's accounts, sessions
//! and tenants (`warden_users`, `warden_sessions`, `warden_tenants`).
//!
//! Token redemption and client deletion run inside a transaction, so a
//! failed or cancelled call leaves nothing behind.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_auth::Stores;
//! use warden_auth_postgres::PostgresAuthStorage;
//!
//! let storage = PostgresAuthStorage::connect(url, 10, Duration::from_secs(5)).await?;
//! storage.migrate().await?;
//! let stores = Stores::from_backend(Arc::new(storage));
//! ```

pub mod authorization;
pub mod client;
pub mod identity;
pub mod keyset;
pub mod schema;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;
use warden_auth::AuthError;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use client::ClientRow;
pub use token::TokenRow;

// =============================================================================
// Error Types
// =============================================================================

/// SQLSTATE codes worth retrying: serialization failure and deadlock.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01"];

/// Errors that can occur during auth storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value does not map onto the domain type.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Maps a unique violation to `Conflict` and a foreign key violation to
    /// `NotFound`; everything else stays a database error.
    pub(crate) fn from_write(err: sqlx_core::Error, what: &str) -> Self {
        if let sqlx_core::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Self::conflict(format!("{what} already exists"));
            }
            if db_err.is_foreign_key_violation() {
                return Self::not_found(format!("{what} references a missing record"));
            }
        }
        Self::from(err)
    }

    // -------------------------------------------------------------------------
    // Predicate Methods
    // -------------------------------------------------------------------------

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if retrying the operation may succeed.
    ///
    /// Covers serialization failures, deadlocks, pool exhaustion and
    /// broken connections.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx_core::Error::Database(db_err)) => db_err
                .code()
                .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
            Self::Database(sqlx_core::Error::PoolTimedOut | sqlx_core::Error::Io(_)) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a server error (5xx equivalent).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Serialization(_) | Self::InvalidInput(_)
        )
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            tracing::warn!(error = %err, "Transient database failure");
            return AuthError::transient(err.to_string());
        }
        match err {
            StorageError::NotFound(resource) => AuthError::not_found(resource),
            StorageError::Conflict(message) => AuthError::conflict(message),
            other => AuthError::storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Parses a stored enum column.
pub(crate) fn parse_column<T>(value: &str) -> StorageResult<T>
where
    T: std::str::FromStr<Err = AuthError>,
{
    value
        .parse()
        .map_err(|e: AuthError| StorageError::invalid_input(e.to_string()))
}

// =============================================================================
// PostgreSQL Auth Storage
// =============================================================================

/// PostgreSQL implementation of every `warden-auth` storage trait.
#[derive(Debug, Clone)]
pub struct PostgresAuthStorage {
    pool: Arc<PgPool>,
}

impl PostgresAuthStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StorageResult<Self> {
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Creates the tables and indexes if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        schema::apply(&self.pool).await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get a reference to the Arc-wrapped pool.
    #[must_use]
    pub fn pool_arc(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_not_found() {
        let err = StorageError::not_found("client abc123");
        assert!(err.is_not_found());
        assert!(!err.is_server_error());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Not found: client abc123");
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = StorageError::from(sqlx_core::Error::PoolTimedOut);
        assert!(err.is_transient());
        assert!(err.is_server_error());
        assert!(AuthError::from(err).is_transient());
    }

    #[test]
    fn test_row_not_found_is_permanent() {
        let err = StorageError::from(sqlx_core::Error::RowNotFound);
        assert!(!err.is_transient());
        assert!(matches!(AuthError::from(err), AuthError::Storage { .. }));
    }

    #[test]
    fn test_auth_error_mapping() {
        assert!(matches!(
            AuthError::from(StorageError::conflict("client 'x'")),
            AuthError::Conflict { .. }
        ));
        assert!(matches!(
            AuthError::from(StorageError::not_found("client 1")),
            AuthError::NotFound { .. }
        ));
        assert!(matches!(
            AuthError::from(StorageError::invalid_input("kind 'jwt'")),
            AuthError::Storage { .. }
        ));
    }
}
