//! Lookups into the identity subsystem's tables.
//!
//! The engine never writes accounts or tenants; the only write is removing
//! a session on logout.

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;
use uuid::Uuid;

use warden_auth::AuthResult;
use warden_auth::storage::{SessionStorage, TenantDirectory, UserStorage};
use warden_auth::types::{Session, UserAccount};

use crate::{PostgresAuthStorage, StorageError};

type UserTuple = (
    String,
    Option<String>,
    Option<String>,
    bool,
    Vec<String>,
    bool,
    Option<OffsetDateTime>,
);

fn into_user(row: UserTuple) -> UserAccount {
    UserAccount {
        subject: row.0,
        name: row.1,
        email: row.2,
        email_verified: row.3,
        roles: row.4,
        disabled: row.5,
        locked_until: row.6,
    }
}

#[async_trait]
impl UserStorage for PostgresAuthStorage {
    async fn find_by_subject(&self, subject: &str) -> AuthResult<Option<UserAccount>> {
        let row: Option<UserTuple> = query_as(
            r#"
            SELECT subject, name, email, email_verified, roles, disabled, locked_until
            FROM warden_users
            WHERE subject = $1
            "#,
        )
        .bind(subject)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(into_user))
    }
}

#[async_trait]
impl SessionStorage for PostgresAuthStorage {
    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>> {
        let row: Option<(String, String, bool, OffsetDateTime)> = query_as(
            "SELECT id, subject, mfa_authenticated, created_at FROM warden_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await
        .map_err(StorageError::from)?;

        Ok(row.map(|(id, subject, mfa_authenticated, created_at)| Session {
            id,
            subject,
            mfa_authenticated,
            created_at,
        }))
    }

    async fn terminate(&self, session_id: &str) -> AuthResult<()> {
        query("DELETE FROM warden_sessions WHERE id = $1")
            .bind(session_id)
            .execute(self.pool())
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for PostgresAuthStorage {
    async fn tenant_exists(&self, tenant_id: Uuid) -> AuthResult<bool> {
        let exists: bool =
            query_scalar("SELECT EXISTS (SELECT 1 FROM warden_tenants WHERE id = $1)")
                .bind(tenant_id)
                .fetch_one(self.pool())
                .await
                .map_err(StorageError::from)?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_row_mapping() {
        let user = into_user((
            "alice".to_string(),
            Some("Alice".to_string()),
            None,
            false,
            vec!["admin".to_string()],
            false,
            None,
        ));
        assert_eq!(user.subject, "alice");
        assert_eq!(user.roles, vec!["admin".to_string()]);
        assert!(user.can_sign_in());
    }
}
