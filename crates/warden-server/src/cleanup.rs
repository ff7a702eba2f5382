//! Background removal of expired tokens.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use warden_auth::AuthResult;
use warden_auth::config::RetryConfig;
use warden_auth::retry::with_retry;
use warden_auth::storage::TokenStorage;

/// Deletes every token that expired before now.
pub async fn prune_expired(tokens: &dyn TokenStorage, retry: &RetryConfig) -> AuthResult<u64> {
    let now = OffsetDateTime::now_utc();
    with_retry(retry, "prune_tokens", || tokens.prune(now)).await
}

/// Runs [`prune_expired`] every `interval` until `shutdown` flips to `true`.
///
/// The first run happens one interval after start. Failures are logged and
/// the next tick tries again.
pub fn spawn_token_cleanup(
    tokens: Arc<dyn TokenStorage>,
    retry: RetryConfig,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match prune_expired(tokens.as_ref(), &retry).await {
                        Ok(0) => tracing::debug!("No expired tokens to prune"),
                        Ok(pruned) => tracing::info!(pruned, "Pruned expired tokens"),
                        Err(e) => tracing::warn!(error = %e, "Token cleanup failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Token cleanup task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use warden_auth::storage::InMemoryAuthStorage;
    use warden_auth::types::{Token, TokenKind, TokenStatus};

    fn token(expires_at: OffsetDateTime) -> Token {
        let now = OffsetDateTime::now_utc();
        Token {
            id: Uuid::new_v4(),
            reference_hash: Token::hash_reference(&Uuid::new_v4().to_string()),
            subject: Some("alice".to_string()),
            client_id: Uuid::new_v4(),
            authorization_id: None,
            kind: TokenKind::Access,
            status: TokenStatus::Valid,
            scopes: vec![],
            audiences: vec![],
            code_challenge: None,
            redirect_uri: None,
            created_at: now,
            expires_at,
            redeemed_at: None,
        }
    }

    #[tokio::test]
    async fn test_prune_expired_keeps_live_tokens() {
        let store = Arc::new(InMemoryAuthStorage::new());
        let now = OffsetDateTime::now_utc();
        TokenStorage::create(store.as_ref(), &token(now - time::Duration::minutes(1)))
            .await
            .unwrap();
        TokenStorage::create(store.as_ref(), &token(now + time::Duration::hours(1)))
            .await
            .unwrap();

        let pruned = prune_expired(store.as_ref(), &RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.tokens().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_runs_and_stops() {
        let store = Arc::new(InMemoryAuthStorage::new());
        let expired = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        TokenStorage::create(store.as_ref(), &token(expired))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_token_cleanup(
            store.clone(),
            RetryConfig::default(),
            Duration::from_secs(60),
            rx,
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.tokens().await.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
