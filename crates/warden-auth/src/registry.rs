//! Client registry.
//!
//! Owns the write-side rules for clients: type-dependent secret handling,
//! tenant ownership and whole-value policy replacement. Every write goes
//! through [`with_retry`] so transient store failures are retried as a unit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::{PaginationConfig, RetryConfig};
use crate::error::AuthError;
use crate::pagination::{Page, PageRequest};
use crate::retry::with_retry;
use crate::secret::{SecretHasher, generate_client_secret};
use crate::storage::{ClientStorage, ModifiedClient, TenantDirectory};
use crate::types::{Client, ClientPolicy, ClientType, ConsentType};

/// Registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewClient {
    /// Public identifier; generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    pub display_name: String,
    pub client_type: ClientType,
    pub tenant_id: Uuid,
    /// Plaintext secret for a confidential client; generated when absent.
    /// Must be absent for public clients.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default = "default_consent_type")]
    pub consent_type: ConsentType,
    #[serde(default)]
    pub policy: ClientPolicy,
}

fn default_consent_type() -> ConsentType {
    ConsentType::Explicit
}

/// Partial update of a client's settings. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUpdate {
    pub display_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub post_logout_redirect_uris: Option<Vec<String>>,
    pub permissions: Option<Vec<String>>,
    pub consent_type: Option<ConsentType>,
}

/// A freshly registered client.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredClient {
    pub client: Client,
    /// Generated plaintext secret. Only ever returned here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Listing projection of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub client_id: String,
    pub display_name: String,
    pub client_type: ClientType,
    pub active: bool,
    pub tenant_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Client> for ClientSummary {
    fn from(client: Client) -> Self {
        Self {
            client_id: client.client_id,
            display_name: client.display_name,
            client_type: client.client_type,
            active: client.active,
            tenant_id: client.tenant_id,
            created_at: client.created_at,
        }
    }
}

/// CRUD over clients and their policy.
#[derive(Clone)]
pub struct ClientRegistry {
    clients: Arc<dyn ClientStorage>,
    tenants: Arc<dyn TenantDirectory>,
    hasher: SecretHasher,
    retry: RetryConfig,
    pagination: PaginationConfig,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStorage>,
        tenants: Arc<dyn TenantDirectory>,
        hasher: SecretHasher,
        retry: RetryConfig,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            clients,
            tenants,
            hasher,
            retry,
            pagination,
        }
    }

    /// Registers a client.
    ///
    /// A confidential client without a supplied secret gets a generated one,
    /// returned once in [`RegisteredClient::client_secret`].
    ///
    /// # Errors
    ///
    /// - `AuthError::BusinessRule` if the client breaks a write-time rule,
    ///   e.g. a public client supplied with a secret
    /// - `AuthError::NotFound` if the tenant does not exist
    /// - `AuthError::Conflict` if the client_id is taken
    pub async fn register(&self, request: NewClient) -> AuthResult<RegisteredClient> {
        if request.client_type == ClientType::Public && request.client_secret.is_some() {
            return Err(public_client_secret());
        }

        if !self.tenants.tenant_exists(request.tenant_id).await? {
            return Err(AuthError::not_found(format!("tenant {}", request.tenant_id)));
        }

        let (secret_hash, generated) = match request.client_type {
            ClientType::Public => (None, None),
            ClientType::Confidential => {
                let (plaintext, generated) = match request.client_secret {
                    Some(secret) => (secret, None),
                    None => {
                        let secret = generate_client_secret();
                        (secret.clone(), Some(secret))
                    }
                };
                (Some(self.hasher.hash_blocking(plaintext).await?), generated)
            }
        };

        let now = OffsetDateTime::now_utc();
        let client = Client {
            id: Uuid::new_v4(),
            client_id: request
                .client_id
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            display_name: request.display_name,
            client_type: request.client_type,
            secret_hash,
            redirect_uris: request.redirect_uris,
            post_logout_redirect_uris: request.post_logout_redirect_uris,
            permissions: request.permissions,
            consent_type: request.consent_type,
            policy: request.policy,
            active: true,
            tenant_id: request.tenant_id,
            created_at: now,
            updated_at: now,
        };
        client.validate()?;

        let client = with_retry(&self.retry, "register_client", || {
            self.clients.create(&client)
        })
        .await?;

        tracing::info!(
            client_id = %client.client_id,
            client_type = client.client_type.as_str(),
            tenant_id = %client.tenant_id,
            "Client registered"
        );

        Ok(RegisteredClient {
            client,
            client_secret: generated,
        })
    }

    /// Finds a client by its public identifier.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the client doesn't exist.
    pub async fn get(&self, client_id: &str) -> AuthResult<Client> {
        self.clients
            .find_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::not_found(format!("client '{client_id}'")))
    }

    /// Applies a partial settings update.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotFound` if the client doesn't exist
    /// - `AuthError::BusinessRule` if the result breaks a write-time rule
    pub async fn update(&self, client_id: &str, update: ClientUpdate) -> AuthResult<Client> {
        let modified = self
            .modify(client_id, "update_client", |client| {
                if let Some(display_name) = &update.display_name {
                    client.display_name = display_name.clone();
                }
                if let Some(uris) = &update.redirect_uris {
                    client.redirect_uris = uris.clone();
                }
                if let Some(uris) = &update.post_logout_redirect_uris {
                    client.post_logout_redirect_uris = uris.clone();
                }
                if let Some(permissions) = &update.permissions {
                    client.permissions = permissions.clone();
                }
                if let Some(consent_type) = update.consent_type {
                    client.consent_type = consent_type;
                }
                Ok(())
            })
            .await?;
        Ok(modified.client)
    }

    /// Replaces the client's policy as a whole.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotFound` if the client doesn't exist
    /// - `AuthError::BusinessRule` if the policy is invalid
    pub async fn update_policy(&self, client_id: &str, policy: ClientPolicy) -> AuthResult<Client> {
        let client = self
            .modify(client_id, "update_client_policy", |client| {
                client.policy = policy.clone();
                Ok(())
            })
            .await?
            .client;

        tracing::info!(
            client_id = %client.client_id,
            require_pkce = client.policy.require_pkce,
            require_mfa = client.policy.require_mfa,
            "Client policy replaced"
        );
        Ok(client)
    }

    /// Generates a new secret for a confidential client and returns it once.
    ///
    /// The previous secret stops working immediately.
    ///
    /// # Errors
    ///
    /// - `AuthError::NotFound` if the client doesn't exist
    /// - `AuthError::BusinessRule` if the client is public
    pub async fn rotate_secret(&self, client_id: &str) -> AuthResult<String> {
        if !self.get(client_id).await?.is_confidential() {
            return Err(public_client_secret());
        }

        let secret = generate_client_secret();
        let hash = self.hasher.hash_blocking(secret.clone()).await?;
        let client = self
            .modify(client_id, "rotate_client_secret", |client| {
                if !client.is_confidential() {
                    return Err(public_client_secret());
                }
                client.secret_hash = Some(hash.clone());
                Ok(())
            })
            .await?
            .client;

        tracing::info!(client_id = %client.client_id, "Client secret rotated");
        Ok(secret)
    }

    /// Activates or deactivates a client.
    ///
    /// Deactivation revokes every outstanding token of the client in the
    /// same storage unit.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the client doesn't exist.
    pub async fn set_active(&self, client_id: &str, active: bool) -> AuthResult<Client> {
        let modified = self
            .modify(client_id, "set_client_active", |client| {
                client.active = active;
                Ok(())
            })
            .await?;

        if !active {
            tracing::info!(
                client_id = %modified.client.client_id,
                revoked = modified.revoked_tokens,
                "Client deactivated"
            );
        }
        Ok(modified.client)
    }

    /// Deletes a client with its authorizations and tokens.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the client doesn't exist.
    pub async fn delete(&self, client_id: &str) -> AuthResult<()> {
        let client = self.get(client_id).await?;
        with_retry(&self.retry, "delete_client", || self.clients.delete(client.id)).await?;
        tracing::info!(client_id = %client.client_id, "Client deleted");
        Ok(())
    }

    /// Lists clients one keyset page at a time.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidArgument` for an unknown sort field or bad page size
    /// - `AuthError::InvalidCursor` for a malformed cursor
    pub async fn list(
        &self,
        tenant_id: Option<Uuid>,
        request: &PageRequest,
    ) -> AuthResult<Page<ClientSummary>> {
        let query = request.validate::<Client>(self.pagination.max_page_size)?;
        let page = self.clients.page(tenant_id, &query).await?;
        Ok(page.map(ClientSummary::from))
    }

    /// Page size used when a caller does not ask for one.
    #[must_use]
    pub fn default_page_size(&self) -> usize {
        self.pagination.default_page_size
    }

    /// Applies `edit` under the storage lock, stamps and validates the
    /// result, retrying the whole unit on transient failures.
    async fn modify(
        &self,
        client_id: &str,
        operation: &str,
        edit: impl Fn(&mut Client) -> AuthResult<()> + Send + Sync,
    ) -> AuthResult<ModifiedClient> {
        let change = |client: &mut Client| -> AuthResult<()> {
            edit(client)?;
            client.updated_at = OffsetDateTime::now_utc();
            client.validate()?;
            Ok(())
        };
        with_retry(&self.retry, operation, || {
            self.clients.modify(client_id, &change)
        })
        .await
    }
}

fn public_client_secret() -> AuthError {
    AuthError::business_rule("Public clients cannot carry a client secret")
}
