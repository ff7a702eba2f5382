//! The signed-in principal and its claims.
//!
//! Every claim goes to the access token. A claim also goes to the identity
//! side (userinfo) when the scope governing it was granted.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::UserAccount;

pub const SCOPE_OPENID: &str = "openid";
pub const SCOPE_PROFILE: &str = "profile";
pub const SCOPE_EMAIL: &str = "email";
pub const SCOPE_ROLES: &str = "roles";

/// Where a claim may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDestination {
    AccessToken,
    IdentityToken,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Claim {
    pub name: String,
    pub value: Value,
    pub destinations: Vec<ClaimDestination>,
}

/// Subject, granted scopes, resource audiences and claims of a sign-in.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub subject: String,
    pub scopes: Vec<String>,
    pub audiences: Vec<String>,
    pub claims: Vec<Claim>,
}

impl Principal {
    /// Builds the principal of `user` for the granted `scopes`.
    #[must_use]
    pub fn new(user: &UserAccount, scopes: Vec<String>, audiences: Vec<String>) -> Self {
        let mut principal = Self {
            subject: user.subject.clone(),
            scopes,
            audiences,
            claims: Vec::new(),
        };

        principal.push("sub", Value::String(user.subject.clone()), None);
        if let Some(name) = &user.name {
            principal.push("name", Value::String(name.clone()), Some(SCOPE_PROFILE));
        }
        if let Some(email) = &user.email {
            principal.push("email", Value::String(email.clone()), Some(SCOPE_EMAIL));
            principal.push(
                "email_verified",
                Value::Bool(user.email_verified),
                Some(SCOPE_EMAIL),
            );
        }
        if !user.roles.is_empty() {
            principal.push(
                "roles",
                Value::Array(user.roles.iter().cloned().map(Value::String).collect()),
                Some(SCOPE_ROLES),
            );
        }
        principal
    }

    /// `governing_scope: None` means the claim is always released.
    fn push(&mut self, name: &str, value: Value, governing_scope: Option<&str>) {
        let identity = governing_scope.is_none_or(|scope| self.has_scope(scope));
        let destinations = if identity {
            vec![ClaimDestination::AccessToken, ClaimDestination::IdentityToken]
        } else {
            vec![ClaimDestination::AccessToken]
        };
        self.claims.push(Claim {
            name: name.to_string(),
            value,
            destinations,
        });
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Claim> {
        self.claims.iter().find(|c| c.name == name)
    }

    /// Claims released to the identity side, as a JSON object.
    #[must_use]
    pub fn identity_claims(&self) -> Map<String, Value> {
        self.claims
            .iter()
            .filter(|c| c.destinations.contains(&ClaimDestination::IdentityToken))
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }
}
