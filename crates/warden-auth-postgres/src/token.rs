//! Token storage in `warden_tokens`.
//!
//! Authorization codes, access tokens and refresh tokens share one table
//! and are told apart by `kind`. Rows are addressed by the SHA-256 hash of
//! the reference only.
//!
//! # Redemption
//!
//! [`TokenStorage::redeem_and_issue`] runs in one transaction:
//!
//! 1. `UPDATE .. SET status = 'redeemed' WHERE id = $1 AND status = 'valid'`
//! 2. zero affected rows means another caller won; roll back
//! 3. insert the replacement tokens and commit
//!
//! Concurrent redeemers block on the row lock of step 1 and re-check the
//! status after the winner commits, so at most one of them sees a row.
//!
//! [`TokenStorage::revoke_on_reuse`] revokes the replayed token, the tokens
//! of its subject and its authorization in one transaction as well.

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
use warden_auth::storage::{RedeemOutcome, TokenStorage};
use warden_auth::types::{Token, TokenFilter};

use crate::authorization::revoke_authorization;
use crate::keyset::{Conditions, push_keyset};
use crate::{PostgresAuthStorage, StorageError, StorageResult, parse_column};

const COLUMNS: &str = "id, reference_hash, subject, client_id, authorization_id, kind, status, \
     scopes, audiences, code_challenge, redirect_uri, created_at, expires_at, redeemed_at";

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("expires_at", "expires_at"),
    ("client_id", "client_id"),
];

type TokenTuple = (
    Uuid,
    String,
    Option<String>,
    Uuid,
    Option<Uuid>,
    String,
    String,
    Vec<String>,
    Vec<String>,
    Option<String>,
    Option<String>,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

/// Token record from database.
#[derive(Debug, Clone)]
pub struct TokenRow {
    pub id: Uuid,
    pub reference_hash: String,
    pub subject: Option<String>,
    pub client_id: Uuid,
    pub authorization_id: Option<Uuid>,
    pub kind: String,
    pub status: String,
    pub scopes: Vec<String>,
    pub audiences: Vec<String>,
    pub code_challenge: Option<String>,
    pub redirect_uri: Option<String>,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub redeemed_at: Option<OffsetDateTime>,
}

impl TokenRow {
    fn from_tuple(row: TokenTuple) -> Self {
        Self {
            id: row.0,
            reference_hash: row.1,
            subject: row.2,
            client_id: row.3,
            authorization_id: row.4,
            kind: row.5,
            status: row.6,
            scopes: row.7,
            audiences: row.8,
            code_challenge: row.9,
            redirect_uri: row.10,
            created_at: row.11,
            expires_at: row.12,
            redeemed_at: row.13,
        }
    }

    /// Converts the row into the domain type.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` or `status` is unknown.
    pub fn into_token(self) -> StorageResult<Token> {
        Ok(Token {
            id: self.id,
            reference_hash: self.reference_hash,
            subject: self.subject,
            client_id: self.client_id,
            authorization_id: self.authorization_id,
            kind: parse_column(&self.kind)?,
            status: parse_column(&self.status)?,
            scopes: self.scopes,
            audiences: self.audiences,
            code_challenge: self.code_challenge,
            redirect_uri: self.redirect_uri,
            created_at: self.created_at,
            expires_at: self.expires_at,
            redeemed_at: self.redeemed_at,
        })
    }
}

async fn insert<'e, E>(executor: E, token: &Token) -> StorageResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    query(&format!(
        r#"
        INSERT INTO warden_tokens ({COLUMNS})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#
    ))
    .bind(token.id)
    .bind(&token.reference_hash)
    .bind(&token.subject)
    .bind(token.client_id)
    .bind(token.authorization_id)
    .bind(token.kind.as_str())
    .bind(token.status.as_str())
    .bind(&token.scopes)
    .bind(&token.audiences)
    .bind(&token.code_challenge)
    .bind(&token.redirect_uri)
    .bind(token.created_at)
    .bind(token.expires_at)
    .bind(token.redeemed_at)
    .execute(executor)
    .await
    .map_err(|e| StorageError::from_write(e, "token reference"))?;
    Ok(())
}

/// Pushes the filter's conditions.
fn push_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    conditions: &mut Conditions,
    filter: &TokenFilter,
) {
    if let Some(client_id) = filter.client_id {
        conditions.push_next(builder);
        builder.push("client_id = ");
        builder.push_bind(client_id);
    }
    if let Some(subject) = &filter.subject {
        conditions.push_next(builder);
        builder.push("subject = ");
        builder.push_bind(subject.clone());
    }
    if let Some(status) = filter.status {
        conditions.push_next(builder);
        builder.push("status = ");
        builder.push_bind(status.as_str());
    }
    if let Some(kind) = filter.kind {
        conditions.push_next(builder);
        builder.push("kind = ");
        builder.push_bind(kind.as_str());
    }
}

/// Revokes every not-yet-revoked token whose `column` equals `key`.
pub(crate) async fn revoke_where<'e, E>(
    executor: E,
    column: &str,
    key: RevokeKey<'_>,
) -> StorageResult<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "UPDATE warden_tokens SET status = 'revoked' WHERE {column} = $1 AND status <> 'revoked'"
    );
    let statement = query(&sql);
    let statement = match key {
        RevokeKey::Id(id) => statement.bind(id),
        RevokeKey::Subject(subject) => statement.bind(subject),
    };
    Ok(statement.execute(executor).await?.rows_affected())
}

pub(crate) enum RevokeKey<'a> {
    Id(Uuid),
    Subject(&'a str),
}

#[async_trait]
impl TokenStorage for PostgresAuthStorage {
    async fn create(&self, token: &Token) -> AuthResult<()> {
        Ok(insert(self.pool(), token).await?)
    }

    async fn find_by_reference_hash(&self, reference_hash: &str) -> AuthResult<Option<Token>> {
        let row: Option<TokenTuple> = query_as(&format!(
            "SELECT {COLUMNS} FROM warden_tokens WHERE reference_hash = $1"
        ))
        .bind(reference_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row
            .map(|r| TokenRow::from_tuple(r).into_token())
            .transpose()?)
    }

    async fn redeem_and_issue(&self, id: Uuid, issued: &[Token]) -> AuthResult<RedeemOutcome> {
        let mut tx = self.pool().begin().await.map_err(StorageError::from)?;

        let redeemed = query(
            r#"
            UPDATE warden_tokens SET status = 'redeemed', redeemed_at = now()
            WHERE id = $1 AND status = 'valid'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::from)?
        .rows_affected();

        if redeemed == 0 {
            tx.rollback().await.map_err(StorageError::from)?;
            tracing::debug!(token = %id, "Token was already consumed");
            return Ok(RedeemOutcome::AlreadyConsumed);
        }

        for token in issued {
            insert(&mut *tx, token).await?;
        }

        tx.commit().await.map_err(StorageError::from)?;
        Ok(RedeemOutcome::Redeemed)
    }

    async fn revoke(&self, id: Uuid) -> AuthResult<bool> {
        Ok(revoke_where(self.pool(), "id", RevokeKey::Id(id)).await? > 0)
    }

    async fn revoke_by_subject(&self, subject: &str) -> AuthResult<u64> {
        Ok(revoke_where(self.pool(), "subject", RevokeKey::Subject(subject)).await?)
    }

    async fn revoke_on_reuse(&self, token: &Token) -> AuthResult<u64> {
        let mut tx = self.pool().begin().await.map_err(StorageError::from)?;

        let mut revoked = revoke_where(&mut *tx, "id", RevokeKey::Id(token.id)).await?;
        if let Some(subject) = token.subject.as_deref() {
            revoked += revoke_where(&mut *tx, "subject", RevokeKey::Subject(subject)).await?;
        }
        if let Some(authorization_id) = token.authorization_id {
            revoke_authorization(&mut *tx, authorization_id).await?;
        }

        tx.commit().await.map_err(StorageError::from)?;
        Ok(revoked)
    }

    async fn prune(&self, before: OffsetDateTime) -> AuthResult<u64> {
        let result = query("DELETE FROM warden_tokens WHERE expires_at < $1")
            .bind(before)
            .execute(self.pool())
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    async fn page(&self, filter: &TokenFilter, keyset: &KeysetQuery) -> AuthResult<Page<Token>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM warden_tokens"));
        let mut conditions = Conditions::default();
        push_filter(&mut builder, &mut conditions, filter);
        push_keyset(&mut builder, &mut conditions, keyset, SORT_COLUMNS)?;

        let rows: Vec<TokenTuple> = builder
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(StorageError::from)?;
        let tokens = rows
            .into_iter()
            .map(|r| TokenRow::from_tuple(r).into_token())
            .collect::<StorageResult<Vec<_>>>()?;
        keyset.finish(tokens)
    }
}
