//! Account flows: registration, login, logout, verification, password and
//! email changes.
//!
//! Every flow validates its input first and reports failures through
//! [`AuthError`]; the boundary decides what the caller sees.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_core::AuthConfig;
use warden_core::validation::{require_non_empty, validate_email, validate_password};

use super::AuthError;
use super::gateway::{AuthGateway, Identity};
use super::notify::{Notification, NotificationKind, Notifier};
use super::single_use::{SingleUseTokenStore, TokenPurpose};
use super::users::{PublicUser, User, hash_password, verify_password};
use crate::middleware::AttemptLimiter;

/// Verified against when the account does not exist, so unknown emails take
/// as long as wrong passwords.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("warden-timing-equalizer").unwrap_or_default());

/// A freshly issued identity token and the account it belongs to.
#[derive(Clone, Serialize)]
pub struct Session {
    /// Signed identity token.
    pub token: String,
    /// Token identifier.
    pub jti: String,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
    /// The account.
    pub user: PublicUser,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("jti", &self.jti)
            .field("expires_at", &self.expires_at)
            .field("user", &self.user.email)
            .finish_non_exhaustive()
    }
}

/// Account flows on top of the auth core.
pub struct AccountService {
    gateway: AuthGateway,
    single_use: Arc<SingleUseTokenStore>,
    notifier: Arc<dyn Notifier>,
    config: AuthConfig,
    login_limiter: AttemptLimiter,
}

impl AccountService {
    /// Create the service.
    #[must_use]
    pub fn new(
        gateway: AuthGateway,
        single_use: Arc<SingleUseTokenStore>,
        notifier: Arc<dyn Notifier>,
        config: AuthConfig,
    ) -> Self {
        let login_limiter = AttemptLimiter::new(config.login_attempts_per_minute);
        Self {
            gateway,
            single_use,
            notifier,
            config,
            login_limiter,
        }
    }

    /// The underlying gateway.
    #[must_use]
    pub const fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    /// Auth configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Create an account and sign it in.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for bad input and `UserExists` if the email is taken.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<Session, AuthError> {
        let email = validate_email(email)?;
        validate_password(password, self.config.min_password_length)?;
        let first_name = require_non_empty("first_name", first_name)?;
        let last_name = require_non_empty("last_name", last_name)?;

        let user = User::new(email, password, first_name, last_name)?;
        self.gateway.users().insert(&user)?;
        tracing::info!(email = %user.email, "Account registered");

        self.session_for(&user)
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for an unknown email or a wrong password,
    /// and `RateLimited` after too many attempts for one email.
    pub fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let Ok(email) = validate_email(email) else {
            return Err(AuthError::InvalidCredentials);
        };

        if !self.login_limiter.check(&email) {
            tracing::warn!(email = %email, "Login rate limited");
            return Err(AuthError::RateLimited);
        }

        let Some(user) = self.gateway.users().get_by_email(&email)? else {
            let _ = verify_password(password, &DUMMY_HASH);
            tracing::debug!(email = %email, "Login for unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        if !user.verify_password(password) {
            tracing::debug!(email = %email, "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        tracing::info!(email = %email, "Login succeeded");
        self.session_for(&user)
    }

    /// Revoke the presented token if it is valid.
    ///
    /// Returns whether anything was revoked. Invalid or expired tokens are
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the revocation could not be recorded.
    pub fn logout(&self, token: Option<&str>) -> Result<bool, AuthError> {
        let Some(claims) = token.and_then(|t| self.gateway.issuer().validate(t).ok()) else {
            return Ok(false);
        };

        self.gateway.revoke(&claims)?;
        tracing::info!(email = %claims.sub, jti = %claims.jti, "Logged out");
        Ok(true)
    }

    /// Send an email verification token.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if there is no such account.
    pub fn send_verification(&self, email: &str) -> Result<(), AuthError> {
        let email = validate_email(email)?;
        if self.gateway.users().get_by_email(&email)?.is_none() {
            return Err(AuthError::AccountNotFound(email));
        }

        let token = self.single_use.create(
            &email,
            TokenPurpose::Verification,
            self.config.verification_ttl(),
        )?;
        self.notify(Notification {
            to: email,
            kind: NotificationKind::Verification,
            token: token.token,
        });
        Ok(())
    }

    /// Spend a verification token and mark its account verified.
    ///
    /// # Errors
    ///
    /// Returns a single-use token failure, or `AccountNotFound` if the account
    /// disappeared since the token was created.
    pub fn verify_email(&self, token: &str) -> Result<PublicUser, AuthError> {
        let email = self.single_use.consume(token.trim(), TokenPurpose::Verification)?;
        let user = self.gateway.users().update(&email, &mut |user| {
            if user.verified_at.is_none() {
                let now = Utc::now();
                user.verified_at = Some(now);
                user.updated_at = now;
            }
        })?;

        tracing::info!(email = %email, "Email verified");
        Ok(user.to_public())
    }

    /// Start a password reset. Succeeds whether or not the account exists.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed email or `Storage`.
    pub fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let email = validate_email(email)?;
        if self.gateway.users().get_by_email(&email)?.is_none() {
            tracing::debug!(email = %email, "Password reset for unknown account");
            return Ok(());
        }

        let token =
            self.single_use
                .create(&email, TokenPurpose::PasswordReset, self.config.reset_ttl())?;
        self.notify(Notification {
            to: email,
            kind: NotificationKind::PasswordReset,
            token: token.token,
        });
        Ok(())
    }

    /// Spend a reset token and set a new password.
    ///
    /// The password is checked first so a rejected password does not burn the token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a short password or a single-use token failure.
    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        validate_password(new_password, self.config.min_password_length)?;

        let email = self
            .single_use
            .consume(token.trim(), TokenPurpose::PasswordReset)?;
        let hash = hash_password(new_password)?;
        self.gateway
            .users()
            .update(&email, &mut |user| user.set_password_hash(&hash))?;

        tracing::info!(email = %email, "Password reset");
        Ok(())
    }

    /// Change the caller's password.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a short password and `InvalidCredentials`
    /// when the current password is wrong.
    pub fn change_password(
        &self,
        identity: &Identity,
        current: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password, self.config.min_password_length)?;

        let user = self.load(identity.email())?;
        if !user.verify_password(current) {
            return Err(AuthError::InvalidCredentials);
        }

        // Only replace the hash that was just verified.
        let hash = hash_password(new_password)?;
        let mut replaced = false;
        self.gateway.users().update(&user.email, &mut |stored| {
            replaced = stored.password_hash == user.password_hash;
            if replaced {
                stored.set_password_hash(&hash);
            }
        })?;
        if !replaced {
            return Err(AuthError::InvalidCredentials);
        }

        tracing::info!(email = %user.email, "Password changed");
        Ok(())
    }

    /// Move the caller to a new email address.
    ///
    /// Superusers may skip the password. Role assignments follow the account,
    /// the presented token is revoked, and a session for the new email is returned.
    /// If the role migration fails the rename is undone.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput`, `InvalidCredentials`, or `UserExists`.
    pub fn change_email(
        &self,
        identity: &Identity,
        password: &str,
        new_email: &str,
    ) -> Result<Session, AuthError> {
        let new_email = validate_email(new_email)?;
        let user = self.load(identity.email())?;

        if !user.is_superuser && !user.verify_password(password) {
            return Err(AuthError::InvalidCredentials);
        }
        if new_email == user.email {
            return Err(AuthError::InvalidInput(
                "new email matches the current one".to_string(),
            ));
        }
        if self.gateway.users().get_by_email(&new_email)?.is_some() {
            return Err(AuthError::UserExists(new_email));
        }

        let renamed = self.gateway.users().rename(&user.email, &new_email)?;
        if let Err(e) = self
            .gateway
            .rbac()
            .migrate_role_assignments(&user.email, &new_email)
        {
            tracing::warn!(email = %user.email, error = %e, "Role migration failed, undoing rename");
            if let Err(undo) = self.gateway.users().rename(&new_email, &user.email) {
                tracing::error!(
                    old = %user.email,
                    new = %new_email,
                    error = %undo,
                    "Could not undo email change"
                );
            }
            return Err(e);
        }

        // The old subject no longer exists, so its token is already unusable.
        if let Err(e) = self.gateway.revoke(&identity.claims) {
            tracing::warn!(jti = %identity.claims.jti, error = %e, "Failed to revoke old session");
        }

        self.session_for(&renamed)
    }

    /// Whether the account's email has been verified.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if there is no such account.
    pub fn is_verified(&self, email: &str) -> Result<bool, AuthError> {
        let email = validate_email(email)?;
        Ok(self.load(&email)?.is_verified())
    }

    fn load(&self, email: &str) -> Result<User, AuthError> {
        self.gateway
            .users()
            .get_by_email(email)?
            .ok_or_else(|| AuthError::AccountNotFound(email.to_string()))
    }

    fn session_for(&self, user: &User) -> Result<Session, AuthError> {
        let (token, claims) = self.gateway.issuer().issue(&user.email)?;
        Ok(Session {
            token,
            expires_at: claims.expires_at(),
            jti: claims.jti,
            user: user.to_public(),
        })
    }

    /// Hand a notification to the notifier without waiting for it.
    fn notify(&self, notification: Notification) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(to = %notification.to, "No runtime, notification dropped");
            return;
        };

        let notifier = Arc::clone(&self.notifier);
        runtime.spawn(async move {
            notifier.deliver(notification).await;
        });
    }
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService")
            .field("gateway", &self.gateway)
            .field("login_limiter", &self.login_limiter)
            .finish_non_exhaustive()
    }
}
