//! Authentication and authorization error types.
//!
//! Every fallible operation in the engine returns [`AuthError`]. Protocol
//! errors carry the OAuth 2.0 error code they are surfaced with; the remaining
//! variants describe write-time rule violations, storage failures and server
//! misconfiguration.

use std::fmt;

/// Errors that can occur during token issuance and client management.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The client is unknown, inactive, or failed authentication.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The authorization code or refresh token is invalid, expired, or revoked.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The requested scope is not permitted for the client.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The bearer token presented to a protected endpoint is not usable.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The client is not permitted to use the requested grant type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of why the client is not authorized.
        message: String,
    },

    /// The server does not support the requested grant type.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The server does not support the requested response type.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// Interactive login is needed but the request forbade prompting.
    #[error("Login required: {message}")]
    LoginRequired {
        /// Description of why login is required.
        message: String,
    },

    /// The user has not consented and the client cannot ask for consent.
    #[error("Consent required: {message}")]
    ConsentRequired {
        /// Description of why consent is required.
        message: String,
    },

    /// The resource owner or server denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// A write violated a domain rule (for example a public client with a secret).
    #[error("Business rule violation: {message}")]
    BusinessRule {
        /// Description of the violated rule.
        message: String,
    },

    /// An argument passed to a data-access primitive is not acceptable.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// A pagination cursor could not be decoded.
    #[error("Invalid cursor: {message}")]
    InvalidCursor {
        /// Description of why the cursor is invalid.
        message: String,
    },

    /// Plaintext input to the secret hasher was empty or malformed.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the invalid input.
        message: String,
    },

    /// The addressed record does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        /// The missing resource.
        resource: String,
    },

    /// The record conflicts with an existing one.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// A storage failure that may succeed when retried (deadlock, timeout).
    #[error("Transient storage failure: {message}")]
    Transient {
        /// Description of the transient failure.
        message: String,
    },

    /// A storage failure that will not succeed when retried.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The server is configured inconsistently. Never retried.
    #[error("Server misconfiguration: {message}")]
    Misconfiguration {
        /// Description of the misconfiguration.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `LoginRequired` error.
    #[must_use]
    pub fn login_required(message: impl Into<String>) -> Self {
        Self::LoginRequired {
            message: message.into(),
        }
    }

    /// Creates a new `ConsentRequired` error.
    #[must_use]
    pub fn consent_required(message: impl Into<String>) -> Self {
        Self::ConsentRequired {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `BusinessRule` error.
    #[must_use]
    pub fn business_rule(message: impl Into<String>) -> Self {
        Self::BusinessRule {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidCursor` error.
    #[must_use]
    pub fn invalid_cursor(message: impl Into<String>) -> Self {
        Self::InvalidCursor {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Transient` error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Misconfiguration` error.
    #[must_use]
    pub fn misconfiguration(message: impl Into<String>) -> Self {
        Self::Misconfiguration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for client-correctable OAuth protocol errors.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidClient { .. }
                | Self::InvalidGrant { .. }
                | Self::InvalidRequest { .. }
                | Self::InvalidScope { .. }
                | Self::InvalidToken { .. }
                | Self::UnauthorizedClient { .. }
                | Self::UnsupportedGrantType { .. }
                | Self::UnsupportedResponseType { .. }
                | Self::LoginRequired { .. }
                | Self::ConsentRequired { .. }
                | Self::AccessDenied { .. }
        )
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.is_protocol_error()
            || matches!(
                self,
                Self::BusinessRule { .. }
                    | Self::InvalidArgument { .. }
                    | Self::InvalidCursor { .. }
                    | Self::InvalidInput { .. }
                    | Self::NotFound { .. }
                    | Self::Conflict { .. }
            )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns `true` if the failed operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the error category for logging and monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidClient { .. }
            | Self::InvalidGrant { .. }
            | Self::InvalidToken { .. }
            | Self::LoginRequired { .. } => ErrorCategory::Authentication,
            Self::InvalidScope { .. }
            | Self::UnauthorizedClient { .. }
            | Self::ConsentRequired { .. }
            | Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::InvalidRequest { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidCursor { .. }
            | Self::InvalidInput { .. } => ErrorCategory::Validation,
            Self::BusinessRule { .. } | Self::NotFound { .. } | Self::Conflict { .. } => {
                ErrorCategory::BusinessRule
            }
            Self::Transient { .. } | Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Misconfiguration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidRequest { .. }
            | Self::BusinessRule { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidCursor { .. }
            | Self::InvalidInput { .. }
            | Self::Conflict { .. } => "invalid_request",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidToken { .. } => "invalid_token",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::LoginRequired { .. } => "login_required",
            Self::ConsentRequired { .. } => "consent_required",
            Self::AccessDenied { .. } => "access_denied",
            Self::NotFound { .. } => "not_found",
            Self::Transient { .. }
            | Self::Storage { .. }
            | Self::Misconfiguration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns the description exposed on the wire.
    ///
    /// Server-side failures are reported generically so that storage details
    /// never reach the caller.
    #[must_use]
    pub fn public_description(&self) -> String {
        match self {
            Self::InvalidClient { message }
            | Self::InvalidGrant { message }
            | Self::InvalidRequest { message }
            | Self::InvalidScope { message }
            | Self::InvalidToken { message }
            | Self::UnauthorizedClient { message }
            | Self::LoginRequired { message }
            | Self::ConsentRequired { message }
            | Self::AccessDenied { message }
            | Self::BusinessRule { message }
            | Self::InvalidArgument { message }
            | Self::InvalidCursor { message }
            | Self::InvalidInput { message }
            | Self::Conflict { message } => message.clone(),
            Self::UnsupportedGrantType { grant_type } => {
                format!("The grant type '{grant_type}' is not supported")
            }
            Self::UnsupportedResponseType { response_type } => {
                format!("The response type '{response_type}' is not supported")
            }
            Self::NotFound { resource } => format!("{resource} was not found"),
            Self::Transient { .. }
            | Self::Storage { .. }
            | Self::Misconfiguration { .. }
            | Self::Internal { .. } => "The server encountered an internal error".to_string(),
        }
    }

    /// Returns the HTTP status code this error is surfaced with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient { .. } | Self::InvalidToken { .. } => 401,
            Self::AccessDenied { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Transient { .. } => 503,
            Self::Storage { .. } | Self::Misconfiguration { .. } | Self::Internal { .. } => 500,
            _ => 400,
        }
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity verification of clients, grants, or tokens.
    Authentication,
    /// Permission and consent checks.
    Authorization,
    /// Malformed requests or arguments.
    Validation,
    /// Write-time domain rule violations.
    BusinessRule,
    /// Storage failures.
    Infrastructure,
    /// Server configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Validation => write!(f, "validation"),
            Self::BusinessRule => write!(f, "business_rule"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
