//! PKCE (Proof Key for Code Exchange), RFC 7636.
//!
//! Only the S256 method is accepted; `plain` is refused.
//!
//! # Example
//!
//! ```
//! use warden_auth::oauth::pkce::{PkceChallenge, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//!
//! let stored = PkceChallenge::new(challenge.as_str().to_string()).unwrap();
//! assert!(stored.verify(&verifier).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Errors that can occur during PKCE operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside 43-128 characters.
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains characters outside `[A-Za-z0-9-._~]`.
    #[error("Invalid verifier characters: must be URL-safe ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    /// Challenge is not a base64url SHA-256 digest.
    #[error("Invalid challenge format: must be a base64url SHA-256 digest")]
    InvalidChallengeFormat,

    /// Only S256 is supported.
    #[error("Unsupported challenge method: {0}. Only S256 is supported.")]
    UnsupportedMethod(String),

    /// Verifier does not match the challenge.
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl From<PkceError> for AuthError {
    fn from(err: PkceError) -> Self {
        match err {
            PkceError::VerificationFailed | PkceError::InvalidVerifierLength(_)
            | PkceError::InvalidVerifierCharacters => AuthError::invalid_grant(err.to_string()),
            PkceError::InvalidChallengeFormat | PkceError::UnsupportedMethod(_) => {
                AuthError::invalid_request(err.to_string())
            }
        }
    }
}

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    #[default]
    S256,
}

impl PkceChallengeMethod {
    /// Parse a `code_challenge_method` parameter.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything but "S256".
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "S256" => Ok(Self::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

/// PKCE code verifier.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Validates a verifier received from a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is outside 43-128 characters or a
    /// character is not unreserved.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }

        Ok(Self(verifier))
    }

    /// Generates a random verifier (32 bytes, base64url).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// S256 code challenge: `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Computes the challenge for a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let digest = Sha256::digest(verifier.0.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Validates a challenge received from a client.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::InvalidChallengeFormat` unless the string decodes
    /// to a 32-byte digest.
    pub fn new(challenge: String) -> Result<Self, PkceError> {
        match URL_SAFE_NO_PAD.decode(&challenge) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self(challenge)),
            _ => Err(PkceError::InvalidChallengeFormat),
        }
    }

    /// Checks a verifier against this challenge.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::VerificationFailed` if the verifier doesn't match.
    pub fn verify(&self, verifier: &PkceVerifier) -> Result<(), PkceError> {
        let expected = Self::from_verifier(verifier);
        if bool::from(self.0.as_bytes().ct_eq(expected.0.as_bytes())) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier =
            PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string()).unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert_eq!(
            challenge.as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generate_and_verify() {
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert!(challenge.verify(&verifier).is_ok());
        assert_eq!(
            challenge.verify(&PkceVerifier::generate()),
            Err(PkceError::VerificationFailed)
        );
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert_eq!(
            PkceVerifier::new("a".repeat(42)).unwrap_err(),
            PkceError::InvalidVerifierLength(42)
        );
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert_eq!(
            PkceVerifier::new("a".repeat(129)).unwrap_err(),
            PkceError::InvalidVerifierLength(129)
        );
    }

    #[test]
    fn test_verifier_characters() {
        let bad = format!("{}+", "a".repeat(43));
        assert_eq!(
            PkceVerifier::new(bad).unwrap_err(),
            PkceError::InvalidVerifierCharacters
        );
    }

    #[test]
    fn test_challenge_format() {
        assert!(PkceChallenge::new("not base64!".to_string()).is_err());
        assert!(PkceChallenge::new("c2hvcnQ".to_string()).is_err());
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(PkceChallengeMethod::parse("S256").unwrap(), PkceChallengeMethod::S256);
        assert!(PkceChallengeMethod::parse("plain").is_err());
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            AuthError::from(PkceError::VerificationFailed),
            AuthError::InvalidGrant { .. }
        ));
        assert!(matches!(
            AuthError::from(PkceError::UnsupportedMethod("plain".to_string())),
            AuthError::InvalidRequest { .. }
        ));
    }
}
