//! Table and index definitions.
//!
//! Every statement is idempotent and executed on its own, so `migrate` can
//! run at each startup.

use sqlx_core::query::query;

use crate::{PgPool, StorageResult};

/// DDL statements in execution order.
pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS warden_tenants (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warden_users (
        subject TEXT PRIMARY KEY,
        name TEXT,
        email TEXT,
        email_verified BOOLEAN NOT NULL DEFAULT FALSE,
        roles TEXT[] NOT NULL DEFAULT '{}',
        disabled BOOLEAN NOT NULL DEFAULT FALSE,
        locked_until TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warden_sessions (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        mfa_authenticated BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warden_clients (
        id UUID PRIMARY KEY,
        client_id TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        client_type TEXT NOT NULL,
        secret_hash TEXT,
        redirect_uris TEXT[] NOT NULL DEFAULT '{}',
        post_logout_redirect_uris TEXT[] NOT NULL DEFAULT '{}',
        permissions TEXT[] NOT NULL DEFAULT '{}',
        consent_type TEXT NOT NULL,
        policy JSONB NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        tenant_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warden_authorizations (
        id UUID PRIMARY KEY,
        subject TEXT NOT NULL,
        client_id UUID NOT NULL REFERENCES warden_clients (id),
        scopes TEXT[] NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        authorization_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warden_tokens (
        id UUID PRIMARY KEY,
        reference_hash TEXT NOT NULL UNIQUE,
        subject TEXT,
        client_id UUID NOT NULL,
        authorization_id UUID,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        scopes TEXT[] NOT NULL DEFAULT '{}',
        audiences TEXT[] NOT NULL DEFAULT '{}',
        code_challenge TEXT,
        redirect_uri TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        redeemed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS warden_clients_created_idx ON warden_clients (created_at, id)",
    "CREATE INDEX IF NOT EXISTS warden_clients_client_id_idx ON warden_clients (client_id COLLATE \"C\", id)",
    "CREATE INDEX IF NOT EXISTS warden_clients_display_name_idx ON warden_clients (display_name COLLATE \"C\", id)",
    "CREATE INDEX IF NOT EXISTS warden_clients_tenant_idx ON warden_clients (tenant_id)",
    "CREATE INDEX IF NOT EXISTS warden_authorizations_subject_idx ON warden_authorizations (subject, client_id)",
    "CREATE INDEX IF NOT EXISTS warden_tokens_subject_idx ON warden_tokens (subject, status)",
    "CREATE INDEX IF NOT EXISTS warden_tokens_client_idx ON warden_tokens (client_id, id)",
    "CREATE INDEX IF NOT EXISTS warden_tokens_expires_idx ON warden_tokens (expires_at)",
];

/// Applies every statement of [`STATEMENTS`].
///
/// # Errors
///
/// Returns the first failing statement's error.
pub async fn apply(pool: &PgPool) -> StorageResult<()> {
    for statement in STATEMENTS {
        query(statement).execute(pool).await?;
    }
    tracing::info!(statements = STATEMENTS.len(), "Database schema is up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for statement in STATEMENTS {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }

    #[test]
    fn test_referenced_tables_come_first() {
        let position = |needle: &str| {
            STATEMENTS
                .iter()
                .position(|s| s.contains(needle))
                .unwrap()
        };
        assert!(
            position("CREATE TABLE IF NOT EXISTS warden_clients")
                < position("CREATE TABLE IF NOT EXISTS warden_authorizations")
        );
    }
}
