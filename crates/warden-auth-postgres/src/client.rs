//! OAuth client storage.
//!
//! Clients live in `warden_clients`; the policy is a JSONB document, URI
//! and permission lists are `TEXT[]`.
//!
//! Read-modify-write goes through [`ClientStorageTrait::modify`], which
//! holds the row lock from `SELECT .. FOR UPDATE` until commit, so
//! concurrent admin writes to one client apply one after the other.
//!
//! This module provides two layers:
//! - [`ClientStorage`] - Low-level queries on [`ClientRow`]
//! - the `warden_auth::storage::ClientStorage` implementation on
//!   [`PostgresAuthStorage`]

use async_trait::async_trait;
use sqlx_core::executor::Executor;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_builder::QueryBuilder;
use sqlx_postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

use warden_auth::AuthResult;
use warden_auth::pagination::{KeysetQuery, Page};
use warden_auth::storage::{ClientChange, ClientStorage as ClientStorageTrait, ModifiedClient};
use warden_auth::types::{Client, ClientPolicy};

use crate::keyset::{Conditions, push_keyset};
use crate::token::{RevokeKey, revoke_where};
use crate::{PgPool, PostgresAuthStorage, StorageError, StorageResult, parse_column};

const COLUMNS: &str = "id, client_id, display_name, client_type, secret_hash, redirect_uris, \
     post_logout_redirect_uris, permissions, consent_type, policy, active, tenant_id, \
     created_at, updated_at";

/// Sortable fields and their columns.
const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("updated_at", "updated_at"),
    ("client_id", "client_id"),
    ("display_name", "display_name"),
];

type ClientTuple = (
    Uuid,
    String,
    String,
    String,
    Option<String>,
    Vec<String>,
    Vec<String>,
    Vec<String>,
    String,
    serde_json::Value,
    bool,
    Uuid,
    OffsetDateTime,
    OffsetDateTime,
);

// =============================================================================
// Types
// =============================================================================

/// Client record from database.
#[derive(Debug, Clone)]
pub struct ClientRow {
    pub id: Uuid,
    pub client_id: String,
    pub display_name: String,
    pub client_type: String,
    pub secret_hash: Option<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub permissions: Vec<String>,
    pub consent_type: String,
    /// [`ClientPolicy`] as JSONB
    pub policy: serde_json::Value,
    pub active: bool,
    pub tenant_id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ClientRow {
    /// Create from database tuple.
    fn from_tuple(row: ClientTuple) -> Self {
        Self {
            id: row.0,
            client_id: row.1,
            display_name: row.2,
            client_type: row.3,
            secret_hash: row.4,
            redirect_uris: row.5,
            post_logout_redirect_uris: row.6,
            permissions: row.7,
            consent_type: row.8,
            policy: row.9,
            active: row.10,
            tenant_id: row.11,
            created_at: row.12,
            updated_at: row.13,
        }
    }

    /// Converts the row into the domain type.
    ///
    /// # Errors
    ///
    /// Returns an error if an enum column or the policy document does not
    /// parse.
    pub fn into_client(self) -> StorageResult<Client> {
        let policy: ClientPolicy = serde_json::from_value(self.policy)?;
        Ok(Client {
            id: self.id,
            client_id: self.client_id,
            display_name: self.display_name,
            client_type: parse_column(&self.client_type)?,
            secret_hash: self.secret_hash,
            redirect_uris: self.redirect_uris,
            post_logout_redirect_uris: self.post_logout_redirect_uris,
            permissions: self.permissions,
            consent_type: parse_column(&self.consent_type)?,
            policy,
            active: self.active,
            tenant_id: self.tenant_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// =============================================================================
// Client Storage
// =============================================================================

/// Low-level client queries.
pub struct ClientStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ClientStorage<'a> {
    /// Create a new client storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find a client by its OAuth client_id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_client_id(&self, client_id: &str) -> StorageResult<Option<ClientRow>> {
        let row: Option<ClientTuple> = query_as(&format!(
            "SELECT {COLUMNS} FROM warden_clients WHERE client_id = $1"
        ))
        .bind(client_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(ClientRow::from_tuple))
    }

    /// Find a client by its internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<ClientRow>> {
        let row: Option<ClientTuple> =
            query_as(&format!("SELECT {COLUMNS} FROM warden_clients WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool)
                .await?;

        Ok(row.map(ClientRow::from_tuple))
    }

    /// Insert a client.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id or client_id is taken.
    pub async fn insert(&self, client: &Client) -> StorageResult<ClientRow> {
        let policy = serde_json::to_value(&client.policy)?;
        let row: ClientTuple = query_as(&format!(
            r#"
            INSERT INTO warden_clients ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(client.id)
        .bind(&client.client_id)
        .bind(&client.display_name)
        .bind(client.client_type.as_str())
        .bind(&client.secret_hash)
        .bind(&client.redirect_uris)
        .bind(&client.post_logout_redirect_uris)
        .bind(&client.permissions)
        .bind(client.consent_type.as_str())
        .bind(policy)
        .bind(client.active)
        .bind(client.tenant_id)
        .bind(client.created_at)
        .bind(client.updated_at)
        .fetch_one(self.pool)
        .await
        .map_err(|e| StorageError::from_write(e, &format!("client '{}'", client.client_id)))?;

        Ok(ClientRow::from_tuple(row))
    }

    /// Delete a client together with its tokens and authorizations.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no client has this id. Nothing is
    /// deleted in that case.
    pub async fn delete_cascade(&self, id: Uuid) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let tokens = query("DELETE FROM warden_tokens WHERE client_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let authorizations = query("DELETE FROM warden_authorizations WHERE client_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = query("DELETE FROM warden_clients WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Err(StorageError::not_found(format!("client {id}")));
        }

        tx.commit().await?;
        tracing::debug!(client = %id, tokens, authorizations, "Client deleted with cascade");
        Ok(())
    }

    /// Fetch one keyset page, optionally within a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn page(
        &self,
        tenant_id: Option<Uuid>,
        keyset: &KeysetQuery,
    ) -> StorageResult<Vec<ClientRow>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM warden_clients"));
        let mut conditions = Conditions::default();
        if let Some(tenant_id) = tenant_id {
            conditions.push_next(&mut builder);
            builder.push("tenant_id = ");
            builder.push_bind(tenant_id);
        }
        push_keyset(&mut builder, &mut conditions, keyset, SORT_COLUMNS)?;

        let rows: Vec<ClientTuple> = builder.build_query_as().fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(ClientRow::from_tuple).collect())
    }
}

/// Selects a client and takes its row lock until the transaction ends.
fn lock_sql() -> String {
    format!("SELECT {COLUMNS} FROM warden_clients WHERE client_id = $1 FOR UPDATE")
}

/// Writes every mutable column; `id` and `client_id` stay as stored.
fn write_sql() -> String {
    format!(
        r#"
        UPDATE warden_clients
        SET display_name = $2, client_type = $3, secret_hash = $4, redirect_uris = $5,
            post_logout_redirect_uris = $6, permissions = $7, consent_type = $8,
            policy = $9, active = $10, tenant_id = $11, updated_at = $12
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    )
}

async fn lock_by_client_id<'e, E>(executor: E, client_id: &str) -> StorageResult<Option<ClientRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<ClientTuple> = query_as(&lock_sql())
        .bind(client_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(ClientRow::from_tuple))
}

async fn write<'e, E>(executor: E, id: Uuid, client: &Client) -> StorageResult<ClientRow>
where
    E: Executor<'e, Database = Postgres>,
{
    let policy = serde_json::to_value(&client.policy)?;
    let row: ClientTuple = query_as(&write_sql())
        .bind(id)
        .bind(&client.display_name)
        .bind(client.client_type.as_str())
        .bind(&client.secret_hash)
        .bind(&client.redirect_uris)
        .bind(&client.post_logout_redirect_uris)
        .bind(&client.permissions)
        .bind(client.consent_type.as_str())
        .bind(policy)
        .bind(client.active)
        .bind(client.tenant_id)
        .bind(client.updated_at)
        .fetch_one(executor)
        .await
        .map_err(|e| StorageError::from_write(e, &format!("client '{}'", client.client_id)))?;
    Ok(ClientRow::from_tuple(row))
}

impl PostgresAuthStorage {
    /// Get client storage operations.
    #[must_use]
    pub fn clients(&self) -> ClientStorage<'_> {
        ClientStorage::new(self.pool())
    }
}

fn into_client(row: Option<ClientRow>) -> StorageResult<Option<Client>> {
    row.map(ClientRow::into_client).transpose()
}

#[async_trait]
impl ClientStorageTrait for PostgresAuthStorage {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(into_client(self.clients().find_by_client_id(client_id).await?)?)
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Client>> {
        Ok(into_client(self.clients().find_by_id(id).await?)?)
    }

    async fn create(&self, client: &Client) -> AuthResult<Client> {
        Ok(self.clients().insert(client).await?.into_client()?)
    }

    async fn modify(
        &self,
        client_id: &str,
        change: ClientChange<'_>,
    ) -> AuthResult<ModifiedClient> {
        let mut tx = self.pool().begin().await.map_err(StorageError::from)?;

        let Some(row) = lock_by_client_id(&mut *tx, client_id).await? else {
            tx.rollback().await.map_err(StorageError::from)?;
            return Err(StorageError::not_found(format!("client '{client_id}'")).into());
        };
        let id = row.id;
        let mut client = row.into_client()?;
        if let Err(e) = change(&mut client) {
            tx.rollback().await.map_err(StorageError::from)?;
            return Err(e);
        }

        let client = write(&mut *tx, id, &client).await?.into_client()?;
        let revoked_tokens = if client.active {
            0
        } else {
            revoke_where(&mut *tx, "client_id", RevokeKey::Id(id)).await?
        };

        tx.commit().await.map_err(StorageError::from)?;
        Ok(ModifiedClient {
            client,
            revoked_tokens,
        })
    }

    async fn delete(&self, id: Uuid) -> AuthResult<()> {
        Ok(self.clients().delete_cascade(id).await?)
    }

    async fn page(
        &self,
        tenant_id: Option<Uuid>,
        query: &KeysetQuery,
    ) -> AuthResult<Page<Client>> {
        let rows = self.clients().page(tenant_id, query).await?;
        let clients = rows
            .into_iter()
            .map(ClientRow::into_client)
            .collect::<StorageResult<Vec<_>>>()?;
        query.finish(clients)
    }
}
