//! Resource owner account and browser session, as seen by the engine.
//!
//! Both are owned by the identity subsystem; the engine only reads them
//! through [`crate::storage::UserStorage`] and [`crate::storage::SessionStorage`].

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A resource owner account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Stable subject identifier.
    pub subject: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Disabled by an administrator.
    pub disabled: bool,
    /// Locked out until this instant.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub locked_until: Option<OffsetDateTime>,
}

impl UserAccount {
    /// Creates an enabled account with no profile data.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            name: None,
            email: None,
            email_verified: false,
            roles: Vec::new(),
            disabled: false,
            locked_until: None,
        }
    }

    /// Returns `true` if the account is neither disabled nor locked out.
    #[must_use]
    pub fn can_sign_in(&self) -> bool {
        !self.disabled
            && self
                .locked_until
                .is_none_or(|until| until <= OffsetDateTime::now_utc())
    }
}

/// An authenticated browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session id carried in the session cookie.
    pub id: String,
    pub subject: String,
    /// The user completed a second factor in this session.
    pub mfa_authenticated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_can_sign_in() {
        let mut user = UserAccount::new("alice");
        assert!(user.can_sign_in());

        user.locked_until = Some(OffsetDateTime::now_utc() + Duration::minutes(5));
        assert!(!user.can_sign_in());

        user.locked_until = Some(OffsetDateTime::now_utc() - Duration::minutes(5));
        assert!(user.can_sign_in());

        user.disabled = true;
        assert!(!user.can_sign_in());
    }
}
