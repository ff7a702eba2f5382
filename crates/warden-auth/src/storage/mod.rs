//! Storage traits for clients, authorizations and tokens.
//!
//! This module defines storage interfaces for:
//!
//! - OAuth client registrations
//! - Authorizations (recorded consent)
//! - Authorization codes, access tokens and refresh tokens
//! - Read-only collaborator lookups (accounts, sessions, tenants)
//!
//! # Implementations
//!
//! - [`memory::InMemoryAuthStorage`] - single-process backend for development
//!   and tests
//! - `warden-auth-postgres` - PostgreSQL storage backend

pub mod authorization;
pub mod client;
pub mod identity;
pub mod memory;
pub mod token;

use std::sync::Arc;

pub use authorization::AuthorizationStorage;
pub use client::{ClientChange, ClientStorage, ModifiedClient};
pub use identity::{SessionStorage, TenantDirectory, UserStorage};
pub use memory::InMemoryAuthStorage;
pub use token::{RedeemOutcome, TokenStorage};

/// Every store the engine talks to.
#[derive(Clone)]
pub struct Stores {
    pub clients: Arc<dyn ClientStorage>,
    pub authorizations: Arc<dyn AuthorizationStorage>,
    pub tokens: Arc<dyn TokenStorage>,
    pub users: Arc<dyn UserStorage>,
    pub sessions: Arc<dyn SessionStorage>,
    pub tenants: Arc<dyn TenantDirectory>,
}

impl Stores {
    /// Uses one backend for every store.
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ClientStorage
            + AuthorizationStorage
            + TokenStorage
            + UserStorage
            + SessionStorage
            + TenantDirectory
            + 'static,
    {
        Self {
            clients: backend.clone(),
            authorizations: backend.clone(),
            tokens: backend.clone(),
            users: backend.clone(),
            sessions: backend.clone(),
            tenants: backend,
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
