//! HTTP middleware for authentication.
//!
//! This module provides Axum extractors for:
//!
//! - Bearer access token validation ([`BearerAuth`])
//! - Admin API key checks ([`AdminAuth`])
//!
//! and the `IntoResponse` rendering of [`crate::AuthError`].
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use warden_auth::middleware::{AuthState, BearerAuth};
//!
//! async fn protected_handler(BearerAuth(token): BearerAuth) -> String {
//!     format!("Hello, {}!", token.subject.unwrap_or_default())
//! }
//!
//! let app = Router::new()
//!     .route("/protected", get(protected_handler))
//!     .with_state(AuthState::new(tokens, users));
//! ```

pub mod admin;
pub mod auth;
pub mod error;

pub use admin::AdminAuth;
pub use auth::{AuthState, BearerAuth, bearer_token};
