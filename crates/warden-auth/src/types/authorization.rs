//! Standing authorizations (recorded consent).

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Valid,
    Revoked,
}

impl AuthorizationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Revoked => "revoked",
        }
    }
}

impl FromStr for AuthorizationStatus {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Self::Valid),
            "revoked" => Ok(Self::Revoked),
            other => Err(AuthError::storage(format!(
                "unknown authorization status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    /// Reused on later requests while it covers the requested scopes.
    Permanent,
    /// Bound to a single flow.
    AdHoc,
}

impl AuthorizationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::AdHoc => "ad_hoc",
        }
    }
}

impl FromStr for AuthorizationType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanent" => Ok(Self::Permanent),
            "ad_hoc" => Ok(Self::AdHoc),
            other => Err(AuthError::storage(format!(
                "unknown authorization type '{other}'"
            ))),
        }
    }
}

/// Consent given by a subject to a client for a set of scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub id: Uuid,
    pub subject: String,
    /// Internal id of the client.
    pub client_id: Uuid,
    pub scopes: Vec<String>,
    pub status: AuthorizationStatus,
    pub authorization_type: AuthorizationType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Authorization {
    /// Creates a new valid permanent authorization.
    #[must_use]
    pub fn permanent(subject: impl Into<String>, client_id: Uuid, scopes: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            client_id,
            scopes,
            status: AuthorizationStatus::Valid,
            authorization_type: AuthorizationType::Permanent,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns `true` if every requested scope was granted.
    #[must_use]
    pub fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|scope| self.scopes.contains(scope))
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.status == AuthorizationStatus::Valid
    }
}
