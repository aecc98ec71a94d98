//! Authentication and authorization.
//!
//! This module provides:
//! - Stateless identity tokens (`TokenIssuer`) with a revocation deny-list
//! - Exactly-once single-use tokens for verification and password reset
//! - Role-based permission checks (`RbacEngine`)
//! - The request-time orchestrator (`AuthGateway`) and its axum extractors
//! - Account flows built on top of all of the above

mod accounts;
mod gateway;
mod jwt;
mod middleware;
mod notify;
mod prune;
mod rbac;
mod revocation;
mod single_use;
mod stores;
mod users;

pub use accounts::{AccountService, Session};
pub use gateway::{
    AuthGateway, DEFAULT_DEADLINE, Identity, RequestAuth, extract_bearer, extract_token,
};
pub(crate) use gateway::run_blocking;
pub use jwt::{Claims, TokenIssuer};
pub use middleware::{OptionalAuth, RequireAuth, cookie_bridge, clear_cookie, session_cookie};
pub use notify::{LogNotifier, Notification, NotificationKind, Notifier};
pub use prune::{PruneReport, Pruner, prune_once};
pub use rbac::{RbacEngine, SUPERUSER_ROLE};
pub use revocation::{RevocationStore, RevokedToken};
pub use single_use::{SingleUseToken, SingleUseTokenStore, TokenPurpose};
pub use stores::AuthStores;
pub use users::{PublicUser, User, UserRepository, UserStore, hash_password, verify_password};

pub use warden_core::config::{AuthConfig, AuthConfigBuilder, CookieConfig};

use thiserror::Error;
use warden_core::ValidationError;

/// Authentication errors.
///
/// The `Display` text of each variant is for logs. Callers outside the
/// process only ever see [`AuthError::public_message`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Token could not be parsed or its signature did not verify.
    #[error("Token malformed: {0}")]
    TokenMalformed(String),

    /// Token is well-formed but past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// Token was explicitly revoked before its expiry.
    #[error("Token revoked")]
    TokenRevoked,

    /// Token subject has no account.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Authenticated, but not permitted.
    #[error("Forbidden: {resource}:{action}")]
    Forbidden {
        /// Resource that was requested.
        resource: String,
        /// Action that was requested.
        action: String,
    },

    /// Single-use token does not exist for the requested purpose.
    #[error("Single-use token not found")]
    SingleUseTokenNotFound,

    /// Single-use token was already consumed.
    #[error("Single-use token already used")]
    SingleUseTokenAlreadyUsed,

    /// Single-use token is past its expiry.
    #[error("Single-use token expired")]
    SingleUseTokenExpired,

    /// Required configuration is absent. Fatal at startup.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Login failed. Never says whether the account exists.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// An account with this email already exists.
    #[error("User already exists: {0}")]
    UserExists(String),

    /// Input failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too many attempts.
    #[error("Rate limited")]
    RateLimited,

    /// Storage error or timeout. Retryable, never an authentication decision.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal configuration or crypto failure.
    #[error("Config error: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether this is one of the failures that collapse to "unauthenticated".
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::TokenMalformed(_)
                | Self::TokenExpired
                | Self::TokenRevoked
                | Self::AccountNotFound(_)
        )
    }

    /// Whether this is a single-use token failure.
    #[must_use]
    pub const fn is_single_use_failure(&self) -> bool {
        matches!(
            self,
            Self::SingleUseTokenNotFound
                | Self::SingleUseTokenAlreadyUsed
                | Self::SingleUseTokenExpired
        )
    }

    /// Whether the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Short machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TokenMalformed(_)
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::AccountNotFound(_) => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::SingleUseTokenNotFound
            | Self::SingleUseTokenAlreadyUsed
            | Self::SingleUseTokenExpired => "invalid_token",
            Self::InvalidCredentials => "invalid_credentials",
            Self::UserExists(_) => "user_exists",
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::Storage(_) => "unavailable",
            Self::ConfigurationMissing(_) | Self::Config(_) => "internal_error",
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Authentication failures are indistinguishable from each other, as are
    /// single-use token failures.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::TokenMalformed(_)
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::AccountNotFound(_) => "unauthenticated".to_string(),
            Self::Forbidden { .. } => "forbidden".to_string(),
            Self::SingleUseTokenNotFound
            | Self::SingleUseTokenAlreadyUsed
            | Self::SingleUseTokenExpired => "invalid or expired token".to_string(),
            Self::InvalidCredentials => "invalid credentials".to_string(),
            Self::UserExists(_) => "user already exists".to_string(),
            Self::InvalidInput(msg) => msg.clone(),
            Self::RateLimited => "too many attempts, try again later".to_string(),
            Self::Storage(_) => "service temporarily unavailable".to_string(),
            Self::ConfigurationMissing(_) | Self::Config(_) => "internal error".to_string(),
        }
    }
}

impl From<ValidationError> for AuthError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<sled::Error> for AuthError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
