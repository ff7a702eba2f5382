//! Authorization (consent) storage in `warden_authorizations`.

use async_trait::async_trait;
use sqlx_core::executor::Executor;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

use warden_auth::AuthResult;
use warden_auth::storage::AuthorizationStorage;
use warden_auth::types::Authorization;

use crate::{PostgresAuthStorage, StorageError, StorageResult, parse_column};

const COLUMNS: &str = "id, subject, client_id, scopes, status, authorization_type, created_at";

type AuthorizationTuple = (
    Uuid,
    String,
    Uuid,
    Vec<String>,
    String,
    String,
    OffsetDateTime,
);

fn into_authorization(row: AuthorizationTuple) -> StorageResult<Authorization> {
    Ok(Authorization {
        id: row.0,
        subject: row.1,
        client_id: row.2,
        scopes: row.3,
        status: parse_column(&row.4)?,
        authorization_type: parse_column(&row.5)?,
        created_at: row.6,
    })
}

#[async_trait]
impl AuthorizationStorage for PostgresAuthStorage {
    async fn create(&self, authorization: &Authorization) -> AuthResult<()> {
        query(&format!(
            "INSERT INTO warden_authorizations ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(authorization.id)
        .bind(&authorization.subject)
        .bind(authorization.client_id)
        .bind(&authorization.scopes)
        .bind(authorization.status.as_str())
        .bind(authorization.authorization_type.as_str())
        .bind(authorization.created_at)
        .execute(self.pool())
        .await
        .map_err(|e| StorageError::from_write(e, &format!("authorization {}", authorization.id)))?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Authorization>> {
        let row: Option<AuthorizationTuple> = query_as(&format!(
            "SELECT {COLUMNS} FROM warden_authorizations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(into_authorization).transpose()?)
    }

    async fn find_permanent(
        &self,
        subject: &str,
        client_id: Uuid,
    ) -> AuthResult<Vec<Authorization>> {
        let rows: Vec<AuthorizationTuple> = query_as(&format!(
            r#"
            SELECT {COLUMNS} FROM warden_authorizations
            WHERE subject = $1 AND client_id = $2
              AND status = 'valid' AND authorization_type = 'permanent'
            ORDER BY created_at DESC, id DESC
            "#
        ))
        .bind(subject)
        .bind(client_id)
        .fetch_all(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(rows
            .into_iter()
            .map(into_authorization)
            .collect::<StorageResult<Vec<_>>>()?)
    }

}

const REVOKE_SQL: &str =
    "UPDATE warden_authorizations SET status = 'revoked' WHERE id = $1 AND status = 'valid'";

/// Marks a valid authorization revoked. Returns `false` if it was not valid.
pub(crate) async fn revoke_authorization<'e, E>(executor: E, id: Uuid) -> StorageResult<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = query(REVOKE_SQL).bind(id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}
