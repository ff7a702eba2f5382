//! Client secret generation and verification.
//!
//! Secrets are hashed with Argon2id into PHC strings. The PHC string carries
//! the algorithm, cost parameters, salt and digest, so verification always
//! uses the parameters a hash was created with, even after the configured
//! costs change.
//!
//! # Example
//!
//! ```
//! use warden_auth::config::HashingConfig;
//! use warden_auth::secret::{SecretHasher, generate_client_secret};
//!
//! let hasher = SecretHasher::new(&HashingConfig::default()).unwrap();
//! let secret = generate_client_secret();
//! let hash = hasher.hash(&secret).unwrap();
//!
//! assert!(hasher.verify(&secret, &hash));
//! assert!(!hasher.verify("wrong", &hash));
//! ```

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;

use crate::AuthResult;
use crate::config::HashingConfig;
use crate::error::AuthError;

/// Prefix of generated client secrets.
pub const CLIENT_SECRET_PREFIX: &str = "wcs_";

/// Generate a new cryptographically secure client secret.
///
/// # Format
///
/// `wcs_{64 hex characters}` (68 characters total)
#[must_use]
pub fn generate_client_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    format!("{CLIENT_SECRET_PREFIX}{}", hex::encode(bytes))
}

/// Salted Argon2id hasher for client secrets.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("params", self.argon2.params())
            .finish()
    }
}

impl SecretHasher {
    /// Creates a hasher with the given cost parameters.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Misconfiguration` if Argon2 rejects the parameters.
    pub fn new(config: &HashingConfig) -> AuthResult<Self> {
        let params = Params::new(
            config.memory_cost_kib,
            config.time_cost,
            config.parallelism,
            None,
        )
        .map_err(|e| AuthError::misconfiguration(format!("invalid argon2 parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hashes a plaintext secret with a fresh 16-byte random salt.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidInput` if the plaintext is empty.
    pub fn hash(&self, plaintext: &str) -> AuthResult<String> {
        if plaintext.is_empty() {
            return Err(AuthError::invalid_input("secret cannot be empty"));
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| AuthError::internal(format!("secret hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verifies a plaintext secret against a stored PHC hash.
    ///
    /// Never errors: a mismatch, an empty input or a malformed hash all yield
    /// `false`. Malformed hashes are logged since they indicate corrupt data.
    #[must_use]
    pub fn verify(&self, plaintext: &str, encoded: &str) -> bool {
        if plaintext.is_empty() || encoded.is_empty() {
            return false;
        }

        let parsed = match PasswordHash::new(encoded) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Stored secret hash is malformed");
                return false;
            }
        };

        self.argon2
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// Runs [`Self::hash`] on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`Self::hash`], plus `AuthError::Internal` if the task panics.
    pub async fn hash_blocking(&self, plaintext: String) -> AuthResult<String> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| AuthError::internal(format!("hashing task failed: {e}")))?
    }

    /// Runs [`Self::verify`] on the blocking thread pool.
    pub async fn verify_blocking(&self, plaintext: String, encoded: String) -> bool {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &encoded))
            .await
            .unwrap_or(false)
    }
}
