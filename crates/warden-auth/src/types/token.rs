//! Token domain type.
//!
//! Authorization codes, access tokens and refresh tokens share one record
//! type. Clients only ever see an opaque reference string; the store keeps
//! its SHA-256 hash and looks tokens up by that hash.
//!
//! # Lifecycle
//!
//! ```text
//! valid ──redeem──▶ redeemed        (codes and refresh tokens, exactly once)
//!   │                  │
//!   └──────revoke──────┴──▶ revoked
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;
use crate::pagination::{Keyset, SortKind, SortValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AuthorizationCode,
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    /// Single-use kinds move to `redeemed` when consumed.
    #[must_use]
    pub fn is_single_use(&self) -> bool {
        matches!(self, Self::AuthorizationCode | Self::Refresh)
    }
}

impl FromStr for TokenKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "access" => Ok(Self::Access),
            "refresh" => Ok(Self::Refresh),
            other => Err(AuthError::storage(format!("unknown token kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Valid,
    Redeemed,
    Revoked,
}

impl TokenStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Redeemed => "redeemed",
            Self::Revoked => "revoked",
        }
    }
}

impl FromStr for TokenStatus {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "redeemed" => Ok(Self::Redeemed),
            "revoked" => Ok(Self::Revoked),
            other => Err(AuthError::storage(format!(
                "unknown token status '{other}'"
            ))),
        }
    }
}

/// A persisted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,

    /// SHA-256 hex of the reference handed to the client.
    #[serde(skip_serializing)]
    pub reference_hash: String,

    /// Resource owner; `None` for client credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Internal id of the client.
    pub client_id: Uuid,

    /// `None` for client credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<Uuid>,

    pub kind: TokenKind,
    pub status: TokenStatus,
    pub scopes: Vec<String>,
    pub audiences: Vec<String>,

    /// S256 PKCE challenge (authorization codes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// Redirect URI the code was issued for (authorization codes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub redeemed_at: Option<OffsetDateTime>,
}

impl Token {
    /// Returns `true` if this token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    /// Returns `true` if the token is `valid` and not expired.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Valid && !self.is_expired()
    }

    /// Hash a reference using SHA-256.
    ///
    /// Used both when storing new tokens and when resolving presented ones.
    #[must_use]
    pub fn hash_reference(reference: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(reference.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a cryptographically secure random reference.
    ///
    /// Returns a 256-bit random value encoded as base64url (43 characters).
    #[must_use]
    pub fn generate_reference() -> String {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

impl Keyset for Token {
    fn keyset_id(&self) -> Uuid {
        self.id
    }

    fn sort_kind(field: &str) -> Option<SortKind> {
        match field {
            "created_at" | "expires_at" => Some(SortKind::Timestamp),
            "client_id" => Some(SortKind::Uuid),
            _ => None,
        }
    }

    fn sort_value(&self, field: &str) -> Option<SortValue> {
        match field {
            "created_at" => Some(SortValue::Timestamp(self.created_at)),
            "expires_at" => Some(SortValue::Timestamp(self.expires_at)),
            "client_id" => Some(SortValue::Uuid(self.client_id)),
            _ => None,
        }
    }
}

/// Filter for token listings. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenFilter {
    pub client_id: Option<Uuid>,
    pub subject: Option<String>,
    pub status: Option<TokenStatus>,
    pub kind: Option<TokenKind>,
}

impl TokenFilter {
    #[must_use]
    pub fn matches(&self, token: &Token) -> bool {
        self.client_id.is_none_or(|id| token.client_id == id)
            && self
                .subject
                .as_deref()
                .is_none_or(|s| token.subject.as_deref() == Some(s))
            && self.status.is_none_or(|s| token.status == s)
            && self.kind.is_none_or(|k| token.kind == k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn create_test_token(expires_in: Duration, status: TokenStatus) -> Token {
        let now = OffsetDateTime::now_utc();
        Token {
            id: Uuid::new_v4(),
            reference_hash: Token::hash_reference("rt_001"),
            subject: Some("alice".to_string()),
            client_id: Uuid::new_v4(),
            authorization_id: Some(Uuid::new_v4()),
            kind: TokenKind::Refresh,
            status,
            scopes: vec!["openid".to_string()],
            audiences: vec![],
            code_challenge: None,
            redirect_uri: None,
            created_at: now,
            expires_at: now + expires_in,
            redeemed_at: None,
        }
    }

    #[test]
    fn test_hash_reference() {
        let hash = Token::hash_reference("rt_001");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, Token::hash_reference("rt_001"));
        assert_ne!(hash, Token::hash_reference("rt_002"));
    }

    #[test]
    fn test_generate_reference() {
        let reference = Token::generate_reference();
        assert_eq!(reference.len(), 43);
        assert!(
            reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(reference, Token::generate_reference());
    }

    #[test]
    fn test_is_active() {
        assert!(create_test_token(Duration::hours(1), TokenStatus::Valid).is_active());
        assert!(!create_test_token(Duration::minutes(-1), TokenStatus::Valid).is_active());
        assert!(!create_test_token(Duration::hours(1), TokenStatus::Redeemed).is_active());
        assert!(!create_test_token(Duration::hours(1), TokenStatus::Revoked).is_active());
    }

    #[test]
    fn test_reference_hash_is_not_serialized() {
        let token = create_test_token(Duration::hours(1), TokenStatus::Valid);
        let json = serde_json::to_value(&token).unwrap();
        assert!(json.get("reference_hash").is_none());
        assert_eq!(json["kind"], "refresh");
    }

    #[test]
    fn test_filter() {
        let token = create_test_token(Duration::hours(1), TokenStatus::Valid);
        assert!(TokenFilter::default().matches(&token));
        assert!(
            TokenFilter {
                subject: Some("alice".to_string()),
                status: Some(TokenStatus::Valid),
                ..Default::default()
            }
            .matches(&token)
        );
        assert!(
            !TokenFilter {
                kind: Some(TokenKind::Access),
                ..Default::default()
            }
            .matches(&token)
        );
    }

    #[test]
    fn test_single_use_kinds() {
        assert!(TokenKind::AuthorizationCode.is_single_use());
        assert!(TokenKind::Refresh.is_single_use());
        assert!(!TokenKind::Access.is_single_use());
    }
}
