//! Refresh token rotation with reuse detection.
//!
//! Every refresh token is single-use. Presenting one moves it from `valid` to
//! `redeemed` and, in the same store operation, persists its replacement pair.
//! Presenting a token that is already `redeemed` is treated as theft: the
//! token, every token of its subject and the authorization behind it are
//! revoked in one store operation, forcing the user to sign in again.
//!
//! A token whose authorization has been revoked can no longer be redeemed.
//!
//! ```text
//!            redeem_and_issue
//!   valid ─────────────────────▶ redeemed
//!     │                              │
//!     │ revoke                       │ replay ⇒ revoke subject
//!     ▼                              ▼
//!  revoked ◀─────────────────────────┘
//! ```

use std::sync::Arc;

use crate::AuthResult;
use crate::config::RetryConfig;
use crate::error::AuthError;
use crate::retry::with_retry;
use crate::storage::{AuthorizationStorage, RedeemOutcome, TokenStorage, UserStorage};
use crate::token::{TokenGrant, TokenIssuer, TokenPair, find_by_reference};
use crate::types::{Client, Token, TokenKind, TokenStatus};

/// Description returned after a replayed single-use token.
pub const TOKEN_THEFT_DESCRIPTION: &str = "possible token theft detected, all sessions revoked";

const REFRESH_TOKEN_INVALID: &str = "refresh token no longer valid";

/// Rotates refresh tokens.
#[derive(Clone)]
pub struct RefreshRotationGuard {
    tokens: Arc<dyn TokenStorage>,
    authorizations: Arc<dyn AuthorizationStorage>,
    users: Arc<dyn UserStorage>,
    issuer: TokenIssuer,
    retry: RetryConfig,
}

impl RefreshRotationGuard {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn TokenStorage>,
        authorizations: Arc<dyn AuthorizationStorage>,
        users: Arc<dyn UserStorage>,
        issuer: TokenIssuer,
        retry: RetryConfig,
    ) -> Self {
        Self {
            tokens,
            authorizations,
            users,
            issuer,
            retry,
        }
    }

    /// Redeems a refresh token and issues its replacement pair.
    ///
    /// `requested_scopes` may narrow the scopes of the new pair; it cannot
    /// widen them.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidGrant` for unknown, foreign, expired, revoked or
    ///   replayed tokens, when the authorization was revoked, and when the
    ///   subject can no longer sign in
    /// - `AuthError::InvalidScope` when `requested_scopes` exceeds the original
    ///   grant
    /// - Storage errors once retries are exhausted
    pub async fn rotate(
        &self,
        client: &Client,
        reference: &str,
        requested_scopes: Option<&[String]>,
    ) -> AuthResult<TokenPair> {
        let token = find_by_reference(self.tokens.as_ref(), reference)
            .await?
            .filter(|t| t.kind == TokenKind::Refresh && t.client_id == client.id)
            .ok_or_else(|| AuthError::invalid_grant(REFRESH_TOKEN_INVALID))?;

        match token.status {
            TokenStatus::Revoked => return Err(AuthError::invalid_grant(REFRESH_TOKEN_INVALID)),
            TokenStatus::Redeemed => {
                return Err(reject_reuse(self.tokens.as_ref(), &self.retry, &token).await);
            }
            TokenStatus::Valid => {}
        }

        if token.is_expired() {
            return Err(AuthError::invalid_grant(REFRESH_TOKEN_INVALID));
        }
        ensure_authorization_valid(self.authorizations.as_ref(), &token, REFRESH_TOKEN_INVALID)
            .await?;

        let subject = token
            .subject
            .as_deref()
            .ok_or_else(|| AuthError::invalid_grant(REFRESH_TOKEN_INVALID))?;
        ensure_can_sign_in(self.users.as_ref(), subject).await?;

        let mut grant = TokenGrant::from_token(&token);
        if let Some(requested) = requested_scopes.filter(|s| !s.is_empty()) {
            grant.scopes = narrow_scopes(&token.scopes, requested)?;
        }

        let tokens = self.tokens.as_ref();
        let issuer = &self.issuer;
        let grant = &grant;
        let id = token.id;
        let (outcome, pair) = with_retry(&self.retry, "refresh_rotation", || {
            let pair = issuer.pair(grant);
            async move {
                let outcome = tokens.redeem_and_issue(id, &pair.tokens()).await?;
                Ok((outcome, pair))
            }
        })
        .await?;

        match outcome {
            RedeemOutcome::Redeemed => {
                tracing::info!(
                    client_id = %client.client_id,
                    subject,
                    "Refresh token rotated"
                );
                Ok(pair)
            }
            // Lost the race against a concurrent redemption
            RedeemOutcome::AlreadyConsumed => {
                Err(reject_reuse(self.tokens.as_ref(), &self.retry, &token).await)
            }
        }
    }
}

/// Revokes a replayed single-use token, every token of its subject and its
/// authorization.
///
/// Returns the error to send to the caller: a generic `invalid_grant`, or the
/// storage error if the revocation itself could not be applied.
pub(crate) async fn reject_reuse(
    tokens: &dyn TokenStorage,
    retry: &RetryConfig,
    token: &Token,
) -> AuthError {
    tracing::warn!(
        token_id = %token.id,
        kind = token.kind.as_str(),
        client = %token.client_id,
        subject = token.subject.as_deref().unwrap_or_default(),
        "Single-use token presented twice, possible token theft"
    );

    let revoked = with_retry(retry, "reuse_revocation", || tokens.revoke_on_reuse(token)).await;

    match revoked {
        Ok(count) => {
            tracing::warn!(
                subject = token.subject.as_deref().unwrap_or_default(),
                revoked = count,
                "Revoked all tokens of subject after reuse"
            );
            AuthError::invalid_grant(TOKEN_THEFT_DESCRIPTION)
        }
        Err(e) => {
            tracing::error!(error = %e, token_id = %token.id, "Failed to revoke after token reuse");
            e
        }
    }
}

/// Fails with `invalid_grant` if the token was issued under an authorization
/// that is missing or no longer valid.
pub(crate) async fn ensure_authorization_valid(
    authorizations: &dyn AuthorizationStorage,
    token: &Token,
    description: &'static str,
) -> AuthResult<()> {
    let Some(authorization_id) = token.authorization_id else {
        return Ok(());
    };
    match authorizations.find_by_id(authorization_id).await? {
        Some(authorization) if authorization.is_valid() => Ok(()),
        _ => {
            tracing::info!(
                token_id = %token.id,
                %authorization_id,
                "Authorization behind token is no longer valid"
            );
            Err(AuthError::invalid_grant(description))
        }
    }
}

/// Fails with `invalid_grant` unless the subject exists and may sign in.
pub(crate) async fn ensure_can_sign_in(users: &dyn UserStorage, subject: &str) -> AuthResult<()> {
    match users.find_by_subject(subject).await? {
        Some(user) if user.can_sign_in() => Ok(()),
        _ => {
            tracing::info!(subject, "Subject can no longer sign in");
            Err(AuthError::invalid_grant(
                "the user is no longer allowed to sign in",
            ))
        }
    }
}

/// Returns `requested` if every scope in it was originally granted.
pub(crate) fn narrow_scopes(granted: &[String], requested: &[String]) -> AuthResult<Vec<String>> {
    match requested.iter().find(|s| !granted.contains(s)) {
        Some(extra) => Err(AuthError::invalid_scope(format!(
            "scope '{extra}' was not granted"
        ))),
        None => Ok(requested.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthConfig;
    use crate::pagination::{KeysetQuery, Page};
    use crate::storage::{ClientStorage, InMemoryAuthStorage};
    use crate::types::{
        Authorization, AuthorizationStatus, ClientPolicy, ClientType, ConsentType, TokenFilter,
        UserAccount,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Fails `revoke_on_reuse` transiently `failures` times, then delegates.
    struct FailingRevocation {
        inner: Arc<InMemoryAuthStorage>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl TokenStorage for FailingRevocation {
        async fn create(&self, token: &Token) -> AuthResult<()> {
            TokenStorage::create(self.inner.as_ref(), token).await
        }

        async fn find_by_reference_hash(&self, reference_hash: &str) -> AuthResult<Option<Token>> {
            self.inner.find_by_reference_hash(reference_hash).await
        }

        async fn redeem_and_issue(
            &self,
            id: Uuid,
            issued: &[Token],
        ) -> AuthResult<RedeemOutcome> {
            self.inner.redeem_and_issue(id, issued).await
        }

        async fn revoke(&self, id: Uuid) -> AuthResult<bool> {
            TokenStorage::revoke(self.inner.as_ref(), id).await
        }

        async fn revoke_by_subject(&self, subject: &str) -> AuthResult<u64> {
            self.inner.revoke_by_subject(subject).await
        }

        async fn revoke_on_reuse(&self, token: &Token) -> AuthResult<u64> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AuthError::transient("connection reset"));
            }
            self.inner.revoke_on_reuse(token).await
        }

        async fn prune(&self, before: OffsetDateTime) -> AuthResult<u64> {
            self.inner.prune(before).await
        }

        async fn page(
            &self,
            filter: &TokenFilter,
            query: &KeysetQuery,
        ) -> AuthResult<Page<Token>> {
            TokenStorage::page(self.inner.as_ref(), filter, query).await
        }
    }

    struct Fixture {
        store: Arc<InMemoryAuthStorage>,
        guard: RefreshRotationGuard,
        issuer: TokenIssuer,
        client: Client,
    }

    fn client(client_id: &str) -> Client {
        let now = OffsetDateTime::now_utc();
        Client {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            display_name: client_id.to_string(),
            client_type: ClientType::Public,
            secret_hash: None,
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            permissions: vec![],
            consent_type: ConsentType::Implicit,
            policy: ClientPolicy::default(),
            active: true,
            tenant_id: Uuid::nil(),
            created_at: now,
            updated_at: now,
        }
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
        }
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryAuthStorage::new());
        fixture_with(store.clone(), store).await
    }

    async fn fixture_with(
        store: Arc<InMemoryAuthStorage>,
        tokens: Arc<dyn TokenStorage>,
    ) -> Fixture {
        store.insert_user(UserAccount::new("alice")).await;
        let client = client("app");
        ClientStorage::create(store.as_ref(), &client).await.unwrap();

        let issuer = TokenIssuer::new(&OAuthConfig::default());
        let guard = RefreshRotationGuard::new(
            tokens,
            store.clone(),
            store.clone(),
            issuer.clone(),
            retry(),
        );
        Fixture {
            store,
            guard,
            issuer,
            client,
        }
    }

    impl Fixture {
        async fn issue(&self, subject: &str) -> TokenPair {
            let scopes = vec!["openid".to_string(), "email".to_string()];
            let authorization = Authorization::permanent(subject, self.client.id, scopes.clone());
            AuthorizationStorage::create(self.store.as_ref(), &authorization)
                .await
                .unwrap();

            let pair = self.issuer.pair(&TokenGrant {
                subject: Some(subject.to_string()),
                client_id: self.client.id,
                authorization_id: Some(authorization.id),
                scopes,
                audiences: vec![],
            });
            for token in pair.tokens() {
                TokenStorage::create(self.store.as_ref(), &token).await.unwrap();
            }
            pair
        }
    }

    fn refresh_ref(pair: &TokenPair) -> String {
        pair.refresh.as_ref().unwrap().reference.clone()
    }

    #[tokio::test]
    async fn test_rotation_issues_new_pair_and_redeems_old() {
        let fx = fixture().await;
        let pair = fx.issue("alice").await;
        let old_id = pair.refresh.as_ref().unwrap().token.id;

        let rotated = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap();

        let old = fx.store.token(old_id).await.unwrap();
        assert_eq!(old.status, TokenStatus::Redeemed);
        assert!(old.redeemed_at.is_some());

        let new_refresh = rotated.refresh.unwrap();
        assert_ne!(new_refresh.reference, refresh_ref(&pair));
        let stored = fx.store.token(new_refresh.token.id).await.unwrap();
        assert_eq!(stored.status, TokenStatus::Valid);
        assert_eq!(stored.subject.as_deref(), Some("alice"));
        assert_eq!(stored.authorization_id, old.authorization_id);
    }

    #[tokio::test]
    async fn test_replay_revokes_every_token_of_subject() {
        let fx = fixture().await;
        let earlier = fx.issue("alice").await;
        let pair = fx.issue("alice").await;
        let bystander = fx.issue("bob").await;

        fx.guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap();

        let err = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
        assert_eq!(err.public_description(), TOKEN_THEFT_DESCRIPTION);

        for token in fx.store.tokens().await {
            match token.subject.as_deref() {
                Some("alice") => assert_eq!(token.status, TokenStatus::Revoked),
                _ => assert_eq!(token.status, TokenStatus::Valid),
            }
        }
        assert_eq!(
            fx.store.token(earlier.access.token.id).await.unwrap().status,
            TokenStatus::Revoked
        );
        assert_eq!(
            fx.store.token(bystander.access.token.id).await.unwrap().status,
            TokenStatus::Valid
        );
    }

    async fn authorization_status(fx: &Fixture, pair: &TokenPair) -> AuthorizationStatus {
        let id = pair.access.token.authorization_id.unwrap();
        AuthorizationStorage::find_by_id(fx.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_replay_revokes_authorization_and_blocks_its_tokens() {
        let fx = fixture().await;
        let pair = fx.issue("alice").await;

        let rotated = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap();
        fx.guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap_err();

        assert_eq!(
            authorization_status(&fx, &pair).await,
            AuthorizationStatus::Revoked
        );
        assert!(
            fx.guard
                .rotate(&fx.client, &refresh_ref(&rotated), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_revoked_authorization_blocks_rotation() {
        let fx = fixture().await;
        let revoked = fx.issue("alice").await;
        let id = revoked.access.token.authorization_id.unwrap();
        let mut authorization = AuthorizationStorage::find_by_id(fx.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap();
        authorization.status = AuthorizationStatus::Revoked;
        // Re-inserting under the same id overwrites the stored authorization
        AuthorizationStorage::create(fx.store.as_ref(), &authorization)
            .await
            .unwrap();

        let err = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&revoked), None)
            .await
            .unwrap_err();
        assert_eq!(err.public_description(), REFRESH_TOKEN_INVALID);
        assert_eq!(
            fx.store
                .token(revoked.refresh.as_ref().unwrap().token.id)
                .await
                .unwrap()
                .status,
            TokenStatus::Valid
        );
    }

    #[tokio::test]
    async fn test_transient_revocation_failure_is_retried() {
        let store = Arc::new(InMemoryAuthStorage::new());
        let tokens = Arc::new(FailingRevocation {
            inner: store.clone(),
            failures: AtomicU32::new(1),
        });
        let fx = fixture_with(store, tokens).await;
        let other = fx.issue("alice").await;
        let pair = fx.issue("alice").await;

        fx.guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap();
        let err = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap_err();

        assert_eq!(err.public_description(), TOKEN_THEFT_DESCRIPTION);
        assert_eq!(
            fx.store.token(other.access.token.id).await.unwrap().status,
            TokenStatus::Revoked
        );
        assert_eq!(
            authorization_status(&fx, &pair).await,
            AuthorizationStatus::Revoked
        );
    }

    #[tokio::test]
    async fn test_failed_revocation_changes_nothing() {
        let store = Arc::new(InMemoryAuthStorage::new());
        let tokens = Arc::new(FailingRevocation {
            inner: store.clone(),
            failures: AtomicU32::new(u32::MAX),
        });
        let fx = fixture_with(store, tokens).await;
        let other = fx.issue("alice").await;
        let pair = fx.issue("alice").await;

        fx.guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap();
        let err = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap_err();

        // The storage error surfaces instead of the theft response
        assert!(err.is_transient());
        assert_eq!(
            fx.store
                .token(pair.refresh.as_ref().unwrap().token.id)
                .await
                .unwrap()
                .status,
            TokenStatus::Redeemed
        );
        assert_eq!(
            fx.store.token(other.access.token.id).await.unwrap().status,
            TokenStatus::Valid
        );
        assert_eq!(
            authorization_status(&fx, &pair).await,
            AuthorizationStatus::Valid
        );
    }

    #[tokio::test]
    async fn test_concurrent_rotations_have_one_winner() {
        let fx = Arc::new(fixture().await);
        let pair = fx.issue("alice").await;
        let reference = refresh_ref(&pair);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let fx = fx.clone();
            let reference = reference.clone();
            handles.push(tokio::spawn(async move {
                fx.guard.rotate(&fx.client, &reference, None).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_rejects_foreign_client_and_wrong_kind() {
        let fx = fixture().await;
        let pair = fx.issue("alice").await;
        let other = client("other");

        let err = fx
            .guard
            .rotate(&other, &refresh_ref(&pair), None)
            .await
            .unwrap_err();
        assert_eq!(err.public_description(), REFRESH_TOKEN_INVALID);

        // An access token cannot be used as a refresh token
        assert!(
            fx.guard
                .rotate(&fx.client, &pair.access.reference, None)
                .await
                .is_err()
        );
        assert!(fx.guard.rotate(&fx.client, "unknown", None).await.is_err());

        // None of the rejections consumed the token
        assert_eq!(
            fx.store
                .token(pair.refresh.as_ref().unwrap().token.id)
                .await
                .unwrap()
                .status,
            TokenStatus::Valid
        );
    }

    #[tokio::test]
    async fn test_revoked_and_expired_are_rejected_without_theft_response() {
        let fx = fixture().await;
        let revoked = fx.issue("alice").await;
        TokenStorage::revoke(fx.store.as_ref(), revoked.refresh.as_ref().unwrap().token.id)
            .await
            .unwrap();

        let err = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&revoked), None)
            .await
            .unwrap_err();
        assert_eq!(err.public_description(), REFRESH_TOKEN_INVALID);

        let mut expired = fx.issuer.pair(&TokenGrant {
            subject: Some("alice".to_string()),
            client_id: fx.client.id,
            authorization_id: None,
            scopes: vec![],
            audiences: vec![],
        });
        let refresh = expired.refresh.as_mut().unwrap();
        refresh.token.expires_at = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        TokenStorage::create(fx.store.as_ref(), &refresh.token)
            .await
            .unwrap();
        assert!(
            fx.guard
                .rotate(&fx.client, &refresh.reference, None)
                .await
                .is_err()
        );

        // The access token of the revoked pair is untouched
        assert_eq!(
            fx.store.token(revoked.access.token.id).await.unwrap().status,
            TokenStatus::Valid
        );
    }

    #[tokio::test]
    async fn test_disabled_subject_is_rejected() {
        let fx = fixture().await;
        let pair = fx.issue("alice").await;
        let mut alice = UserAccount::new("alice");
        alice.disabled = true;
        fx.store.insert_user(alice).await;

        let err = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&pair), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));

        let unknown = fx.issue("mallory").await;
        assert!(
            fx.guard
                .rotate(&fx.client, &refresh_ref(&unknown), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_scope_narrowing() {
        let fx = fixture().await;
        let pair = fx.issue("alice").await;

        let widened = fx
            .guard
            .rotate(
                &fx.client,
                &refresh_ref(&pair),
                Some(&["openid".to_string(), "roles".to_string()]),
            )
            .await
            .unwrap_err();
        assert!(matches!(widened, AuthError::InvalidScope { .. }));

        let narrowed = fx
            .guard
            .rotate(&fx.client, &refresh_ref(&pair), Some(&["openid".to_string()]))
            .await
            .unwrap();
        assert_eq!(narrowed.access.token.scopes, vec!["openid".to_string()]);
    }
}
