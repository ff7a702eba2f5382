//! Client authentication for the token endpoint.
//!
//! # Authentication Methods
//!
//! - `none` - Public clients (client_id only; any secret is ignored)
//! - `client_secret_basic` - HTTP Basic Auth with client_id:client_secret
//! - `client_secret_post` - client_id and client_secret in the request body
//!
//! When both Basic credentials and body parameters are present, Basic wins.
//!
//! Every failure is reported with the same `invalid_client` description, so a
//! caller cannot tell an unknown client from a wrong secret. The concrete
//! reason is logged at debug level. A presented secret is always run through
//! Argon2, against a throwaway hash when the client is unknown or inactive,
//! so response time does not reveal which client ids exist either.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::AuthResult;
use crate::error::AuthError;
use crate::secret::{SecretHasher, generate_client_secret};
use crate::storage::ClientStorage;
use crate::types::{Client, ClientType};

/// Description sent with every `invalid_client` failure.
pub const INVALID_CLIENT_DESCRIPTION: &str = "Client authentication failed";

/// Token endpoint authentication methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    None,
    ClientSecretBasic,
    ClientSecretPost,
}

impl TokenEndpointAuthMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials presented by a client.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub method: TokenEndpointAuthMethod,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("method", &self.method)
            .finish()
    }
}

impl ClientCredentials {
    /// Picks the credentials of a token request.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` when no client_id is present at all.
    pub fn resolve(
        basic: Option<(String, String)>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> AuthResult<Self> {
        if let Some((id, secret)) = basic {
            return Ok(Self {
                client_id: id,
                client_secret: Some(secret).filter(|s| !s.is_empty()),
                method: TokenEndpointAuthMethod::ClientSecretBasic,
            });
        }

        let client_id = client_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthError::invalid_client(INVALID_CLIENT_DESCRIPTION))?;

        let client_secret = client_secret
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let method = if client_secret.is_some() {
            TokenEndpointAuthMethod::ClientSecretPost
        } else {
            TokenEndpointAuthMethod::None
        };

        Ok(Self {
            client_id: client_id.to_string(),
            client_secret,
            method,
        })
    }
}

/// Authenticates clients against the registry.
#[derive(Clone)]
pub struct ClientAuthenticator {
    clients: Arc<dyn ClientStorage>,
    hasher: SecretHasher,
    /// Hash of a random secret, made with the configured cost parameters.
    dummy_hash: Arc<OnceCell<String>>,
}

impl ClientAuthenticator {
    #[must_use]
    pub fn new(clients: Arc<dyn ClientStorage>, hasher: SecretHasher) -> Self {
        Self {
            clients,
            hasher,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Spends the same Argon2 work a real verification would, then fails.
    async fn verify_against_dummy(&self, secret: &str) {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| self.hasher.hash_blocking(generate_client_secret()))
            .await;
        match hash {
            Ok(hash) => {
                self.hasher
                    .verify_blocking(secret.to_string(), hash.clone())
                    .await;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to prepare dummy client secret hash"),
        }
    }

    /// Authenticates a client.
    ///
    /// Public clients succeed regardless of any secret. Confidential clients
    /// need a non-empty secret that verifies against a non-empty stored hash.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` with [`INVALID_CLIENT_DESCRIPTION`]
    /// for every authentication failure.
    pub async fn authenticate(&self, credentials: &ClientCredentials) -> AuthResult<Client> {
        let reject = |reason: &str| {
            tracing::debug!(
                client_id = %credentials.client_id,
                method = %credentials.method,
                reason,
                "Client authentication failed"
            );
            AuthError::invalid_client(INVALID_CLIENT_DESCRIPTION)
        };

        let presented = credentials.client_secret.as_deref().filter(|s| !s.is_empty());

        let client = match self
            .clients
            .find_by_client_id(&credentials.client_id)
            .await?
        {
            Some(client) if client.active => client,
            found => {
                if let Some(secret) = presented {
                    self.verify_against_dummy(secret).await;
                }
                let reason = if found.is_some() {
                    "client inactive"
                } else {
                    "unknown client"
                };
                return Err(reject(reason));
            }
        };

        match client.client_type {
            ClientType::Public => Ok(client),
            ClientType::Confidential => {
                let Some(secret) = presented else {
                    return Err(reject("missing secret"));
                };
                let Some(hash) = client.secret_hash.as_deref().filter(|h| !h.is_empty()) else {
                    self.verify_against_dummy(secret).await;
                    return Err(reject("missing stored secret hash"));
                };

                if !self
                    .hasher
                    .verify_blocking(secret.to_string(), hash.to_string())
                    .await
                {
                    return Err(reject("secret mismatch"));
                }
                Ok(client)
            }
        }
    }
}

/// Parse an HTTP Basic Auth header value into `(client_id, client_secret)`.
///
/// Both parts are form-urlencoded per RFC 6749 section 2.3.1.
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    // Split on first colon (the secret may contain colons)
    let (client_id, client_secret) = credentials.split_once(':')?;

    Some((form_decode(client_id)?, form_decode(client_secret)?))
}

fn form_decode(value: &str) -> Option<String> {
    urlencoding::decode(&value.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashingConfig;
    use crate::storage::InMemoryAuthStorage;
    use crate::types::{ClientPolicy, ConsentType};
    use base64::Engine;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn hasher() -> SecretHasher {
        SecretHasher::new(&HashingConfig {
            memory_cost_kib: 8,
            time_cost: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    fn create_client(client_id: &str, client_type: ClientType, secret_hash: Option<String>) -> Client {
        let now = OffsetDateTime::now_utc();
        Client {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            display_name: client_id.to_string(),
            client_type,
            secret_hash,
            redirect_uris: vec![],
            post_logout_redirect_uris: vec![],
            permissions: vec![],
            consent_type: ConsentType::Explicit,
            policy: ClientPolicy::default(),
            active: true,
            tenant_id: Uuid::nil(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn authenticator() -> ClientAuthenticator {
        let hasher = hasher();
        let store = Arc::new(InMemoryAuthStorage::new());
        ClientStorage::create(
            store.as_ref(),
            &create_client("public-client", ClientType::Public, None),
        )
        .await
        .unwrap();
        ClientStorage::create(
            store.as_ref(),
            &create_client(
                "confidential-1",
                ClientType::Confidential,
                Some(hasher.hash("S").unwrap()),
            ),
        )
        .await
        .unwrap();
        let mut inactive = create_client("inactive", ClientType::Public, None);
        inactive.active = false;
        ClientStorage::create(store.as_ref(), &inactive).await.unwrap();

        ClientAuthenticator::new(store, hasher)
    }

    fn creds(client_id: &str, secret: Option<&str>) -> ClientCredentials {
        ClientCredentials::resolve(None, Some(client_id), secret).unwrap()
    }

    #[tokio::test]
    async fn test_public_client_ignores_secret() {
        let auth = authenticator().await;
        for secret in [None, Some("anything"), Some("")] {
            let client = auth.authenticate(&creds("public-client", secret)).await.unwrap();
            assert_eq!(client.client_id, "public-client");
        }
    }

    #[tokio::test]
    async fn test_confidential_client_with_correct_secret() {
        let auth = authenticator().await;
        let client = auth
            .authenticate(&creds("confidential-1", Some("S")))
            .await
            .unwrap();
        assert_eq!(client.client_id, "confidential-1");
    }

    #[tokio::test]
    async fn test_failures_are_indistinguishable() {
        let auth = authenticator().await;
        let unknown = auth
            .authenticate(&creds("nope", Some("S")))
            .await
            .unwrap_err();

        for attempt in [
            creds("confidential-1", None),
            creds("confidential-1", Some("wrong")),
            creds("inactive", None),
        ] {
            let err = auth.authenticate(&attempt).await.unwrap_err();
            assert_eq!(err.to_string(), unknown.to_string());
            assert_eq!(err.oauth_error_code(), "invalid_client");
        }
    }

    #[tokio::test]
    async fn test_unknown_client_secret_still_hashed() {
        let auth = authenticator().await;
        assert!(auth.dummy_hash.get().is_none());

        // No secret presented: nothing to hash
        assert!(auth.authenticate(&creds("nope", None)).await.is_err());
        assert!(auth.dummy_hash.get().is_none());

        assert!(auth.authenticate(&creds("nope", Some("S"))).await.is_err());
        let dummy = auth.dummy_hash.get().unwrap();
        assert!(dummy.starts_with("$argon2id$"));
        assert!(!auth.hasher.verify("S", dummy));
    }

    #[tokio::test]
    async fn test_confidential_with_empty_stored_hash_fails() {
        let hasher = hasher();
        let store = Arc::new(InMemoryAuthStorage::new());
        ClientStorage::create(
            store.as_ref(),
            &create_client("broken", ClientType::Confidential, Some(String::new())),
        )
        .await
        .unwrap();
        let auth = ClientAuthenticator::new(store, hasher);
        assert!(auth.authenticate(&creds("broken", Some("S"))).await.is_err());
    }

    #[test]
    fn test_basic_auth_wins_over_body() {
        let creds = ClientCredentials::resolve(
            Some(("from-header".to_string(), "s".to_string())),
            Some("from-body"),
            Some("t"),
        )
        .unwrap();
        assert_eq!(creds.client_id, "from-header");
        assert_eq!(creds.method, TokenEndpointAuthMethod::ClientSecretBasic);
    }

    #[test]
    fn test_resolve_methods() {
        let post = ClientCredentials::resolve(None, Some("c"), Some("s")).unwrap();
        assert_eq!(post.method, TokenEndpointAuthMethod::ClientSecretPost);

        let none = ClientCredentials::resolve(None, Some("c"), None).unwrap();
        assert_eq!(none.method, TokenEndpointAuthMethod::None);

        assert!(ClientCredentials::resolve(None, None, Some("s")).is_err());
    }

    #[test]
    fn test_parse_basic_auth() {
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("confidential-1:se:cr%3At")
        );
        assert_eq!(
            parse_basic_auth(&header),
            Some(("confidential-1".to_string(), "se:cr:t".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
    }

    #[test]
    fn test_parse_basic_auth_keeps_raw_form_delimiters() {
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("app&x=1:a=b&c+d%2B")
        );
        assert_eq!(
            parse_basic_auth(&header),
            Some(("app&x=1".to_string(), "a=b&c d+".to_string()))
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds = ClientCredentials::resolve(None, Some("c"), Some("hunter2")).unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
