//! In-memory storage backend.
//!
//! All collections live behind one async `RwLock`. Every mutation, including
//! multi-row ones such as redeem-and-issue or the client delete cascade, is
//! applied inside a single critical section with no await points, so a
//! cancelled caller never observes or leaves a partial write.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_auth::storage::{InMemoryAuthStorage, Stores};
//!
//! let backend = Arc::new(InMemoryAuthStorage::new());
//! backend.insert_user(UserAccount::new("alice")).await;
//! let stores = Stores::from_backend(backend);
//! ```

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::pagination::{KeysetQuery, Page, page_query};
use crate::storage::{
    AuthorizationStorage, ClientChange, ClientStorage, ModifiedClient, RedeemOutcome,
    SessionStorage, TenantDirectory, TokenStorage, UserStorage,
};
use crate::types::{
    Authorization, AuthorizationStatus, AuthorizationType, Client, Session, Token, TokenFilter,
    TokenStatus, UserAccount,
};

#[derive(Default)]
struct Inner {
    clients: HashMap<Uuid, Client>,
    client_ids: HashMap<String, Uuid>,
    authorizations: HashMap<Uuid, Authorization>,
    tokens: HashMap<Uuid, Token>,
    token_hashes: HashMap<String, Uuid>,
    users: HashMap<String, UserAccount>,
    sessions: HashMap<String, Session>,
    tenants: HashSet<Uuid>,
}

impl Inner {
    fn insert_token(&mut self, token: &Token) -> AuthResult<()> {
        if self.token_hashes.contains_key(&token.reference_hash) {
            return Err(AuthError::conflict("token reference already exists"));
        }
        self.token_hashes
            .insert(token.reference_hash.clone(), token.id);
        self.tokens.insert(token.id, token.clone());
        Ok(())
    }

    fn revoke_where(&mut self, pred: impl Fn(&Token) -> bool) -> u64 {
        let mut count = 0;
        for token in self.tokens.values_mut() {
            if token.status != TokenStatus::Revoked && pred(token) {
                token.status = TokenStatus::Revoked;
                count += 1;
            }
        }
        count
    }
}

/// Single-process implementation of every storage trait.
#[derive(Default)]
pub struct InMemoryAuthStorage {
    inner: RwLock<Inner>,
}

impl InMemoryAuthStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tenant.
    pub async fn insert_tenant(&self, tenant_id: Uuid) {
        self.inner.write().await.tenants.insert(tenant_id);
    }

    /// Adds or replaces an account.
    pub async fn insert_user(&self, user: UserAccount) {
        self.inner
            .write()
            .await
            .users
            .insert(user.subject.clone(), user);
    }

    /// Adds a browser session.
    pub async fn insert_session(&self, session: Session) {
        self.inner
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session);
    }

    /// Returns a token by internal id.
    pub async fn token(&self, id: Uuid) -> Option<Token> {
        self.inner.read().await.tokens.get(&id).cloned()
    }

    /// Returns every stored token.
    pub async fn tokens(&self) -> Vec<Token> {
        self.inner.read().await.tokens.values().cloned().collect()
    }
}

#[async_trait]
impl ClientStorage for InMemoryAuthStorage {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        let inner = self.inner.read().await;
        Ok(inner
            .client_ids
            .get(client_id)
            .and_then(|id| inner.clients.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Client>> {
        Ok(self.inner.read().await.clients.get(&id).cloned())
    }

    async fn create(&self, client: &Client) -> AuthResult<Client> {
        let mut inner = self.inner.write().await;
        if inner.client_ids.contains_key(&client.client_id) || inner.clients.contains_key(&client.id)
        {
            return Err(AuthError::conflict(format!(
                "client '{}' already exists",
                client.client_id
            )));
        }
        inner.client_ids.insert(client.client_id.clone(), client.id);
        inner.clients.insert(client.id, client.clone());
        Ok(client.clone())
    }

    async fn modify(
        &self,
        client_id: &str,
        change: ClientChange<'_>,
    ) -> AuthResult<ModifiedClient> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner
            .client_ids
            .get(client_id)
            .and_then(|id| inner.clients.get(id))
        else {
            return Err(AuthError::not_found(format!("client '{client_id}'")));
        };

        let mut client = existing.clone();
        change(&mut client)?;
        client.id = existing.id;
        client.client_id = existing.client_id.clone();

        let id = client.id;
        let revoked_tokens = if client.active {
            0
        } else {
            inner.revoke_where(|t| t.client_id == id)
        };
        inner.clients.insert(id, client.clone());
        Ok(ModifiedClient {
            client,
            revoked_tokens,
        })
    }

    async fn delete(&self, id: Uuid) -> AuthResult<()> {
        let mut inner = self.inner.write().await;
        let Some(client) = inner.clients.remove(&id) else {
            return Err(AuthError::not_found(format!("client {id}")));
        };
        inner.client_ids.remove(&client.client_id);
        inner.authorizations.retain(|_, a| a.client_id != id);

        let Inner {
            tokens,
            token_hashes,
            ..
        } = &mut *inner;
        tokens.retain(|_, t| {
            let keep = t.client_id != id;
            if !keep {
                token_hashes.remove(&t.reference_hash);
            }
            keep
        });
        Ok(())
    }

    async fn page(
        &self,
        tenant_id: Option<Uuid>,
        query: &KeysetQuery,
    ) -> AuthResult<Page<Client>> {
        let inner = self.inner.read().await;
        page_query(
            inner.clients.values().cloned(),
            |c| tenant_id.is_none_or(|t| c.tenant_id == t),
            query,
        )
    }
}

#[async_trait]
impl AuthorizationStorage for InMemoryAuthStorage {
    async fn create(&self, authorization: &Authorization) -> AuthResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(&authorization.client_id) {
            return Err(AuthError::not_found(format!(
                "client {}",
                authorization.client_id
            )));
        }
        inner
            .authorizations
            .insert(authorization.id, authorization.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Authorization>> {
        Ok(self.inner.read().await.authorizations.get(&id).cloned())
    }

    async fn find_permanent(
        &self,
        subject: &str,
        client_id: Uuid,
    ) -> AuthResult<Vec<Authorization>> {
        let inner = self.inner.read().await;
        let mut found: Vec<Authorization> = inner
            .authorizations
            .values()
            .filter(|a| {
                a.subject == subject
                    && a.client_id == client_id
                    && a.status == AuthorizationStatus::Valid
                    && a.authorization_type == AuthorizationType::Permanent
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }
}

#[async_trait]
impl TokenStorage for InMemoryAuthStorage {
    async fn create(&self, token: &Token) -> AuthResult<()> {
        self.inner.write().await.insert_token(token)
    }

    async fn find_by_reference_hash(&self, reference_hash: &str) -> AuthResult<Option<Token>> {
        let inner = self.inner.read().await;
        Ok(inner
            .token_hashes
            .get(reference_hash)
            .and_then(|id| inner.tokens.get(id))
            .cloned())
    }

    async fn redeem_and_issue(&self, id: Uuid, issued: &[Token]) -> AuthResult<RedeemOutcome> {
        let mut inner = self.inner.write().await;

        match inner.tokens.get(&id) {
            Some(token) if token.status == TokenStatus::Valid => {}
            _ => return Ok(RedeemOutcome::AlreadyConsumed),
        }

        // Check every insert before touching anything
        for token in issued {
            if inner.token_hashes.contains_key(&token.reference_hash) {
                return Err(AuthError::conflict("token reference already exists"));
            }
        }

        if let Some(token) = inner.tokens.get_mut(&id) {
            token.status = TokenStatus::Redeemed;
            token.redeemed_at = Some(OffsetDateTime::now_utc());
        }
        for token in issued {
            inner.insert_token(token)?;
        }
        Ok(RedeemOutcome::Redeemed)
    }

    async fn revoke(&self, id: Uuid) -> AuthResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.tokens.get_mut(&id) {
            Some(t) if t.status != TokenStatus::Revoked => {
                t.status = TokenStatus::Revoked;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_subject(&self, subject: &str) -> AuthResult<u64> {
        Ok(self
            .inner
            .write()
            .await
            .revoke_where(|t| t.subject.as_deref() == Some(subject)))
    }

    async fn revoke_on_reuse(&self, token: &Token) -> AuthResult<u64> {
        let mut inner = self.inner.write().await;
        if let Some(id) = token.authorization_id
            && let Some(authorization) = inner.authorizations.get_mut(&id)
        {
            authorization.status = AuthorizationStatus::Revoked;
        }

        let id = token.id;
        let subject = token.subject.as_deref();
        Ok(inner.revoke_where(|t| {
            t.id == id || (subject.is_some() && t.subject.as_deref() == subject)
        }))
    }

    async fn prune(&self, before: OffsetDateTime) -> AuthResult<u64> {
        let mut inner = self.inner.write().await;
        let Inner {
            tokens,
            token_hashes,
            ..
        } = &mut *inner;

        let before_len = tokens.len();
        tokens.retain(|_, t| {
            let keep = t.expires_at >= before;
            if !keep {
                token_hashes.remove(&t.reference_hash);
            }
            keep
        });
        Ok((before_len - tokens.len()) as u64)
    }

    async fn page(&self, filter: &TokenFilter, query: &KeysetQuery) -> AuthResult<Page<Token>> {
        let inner = self.inner.read().await;
        page_query(inner.tokens.values().cloned(), |t| filter.matches(t), query)
    }
}

#[async_trait]
impl UserStorage for InMemoryAuthStorage {
    async fn find_by_subject(&self, subject: &str) -> AuthResult<Option<UserAccount>> {
        Ok(self.inner.read().await.users.get(subject).cloned())
    }
}

#[async_trait]
impl SessionStorage for InMemoryAuthStorage {
    async fn find(&self, session_id: &str) -> AuthResult<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(session_id).cloned())
    }

    async fn terminate(&self, session_id: &str) -> AuthResult<()> {
        self.inner.write().await.sessions.remove(session_id);
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryAuthStorage {
    async fn tenant_exists(&self, tenant_id: Uuid) -> AuthResult<bool> {
        Ok(self.inner.read().await.tenants.contains(&tenant_id))
    }
}
