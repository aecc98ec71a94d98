//! Authentication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::SigningSecret;
use crate::validation::limits::DEFAULT_MIN_PASSWORD_LENGTH;

/// Token lifetime used when no TTL is configured.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 3600);

/// Secret used only when `allow_dev_secret` is set and no real secret exists.
const DEV_SECRET: &str = "warden-dev-secret-do-not-deploy";

const DEFAULT_ISSUER: &str = "warden";
const DEFAULT_COOKIE_NAME: &str = "warden_auth";
const DEFAULT_VERIFICATION_TTL_HOURS: u64 = 24;
const DEFAULT_RESET_TTL_MINUTES: u64 = 60;
const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 3600;
const DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE: u32 = 10;

/// Why a signing secret could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSecret;

impl std::fmt::Display for MissingSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no signing secret configured (set auth.jwtSecret or WARDEN_JWT_SECRET)"
        )
    }
}

/// Authentication configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Token signing secret. Required unless `allow_dev_secret` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Fall back to a fixed development secret when none is configured.
    #[serde(default)]
    pub allow_dev_secret: bool,

    /// Issuer claim stamped on and required from every token.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Identity token lifetime in minutes. Absent or 0 means the default TTL.
    #[serde(default)]
    pub token_ttl_minutes: Option<u64>,

    /// Email verification token lifetime in hours.
    #[serde(default = "default_verification_ttl")]
    pub verification_ttl_hours: u64,

    /// Password reset token lifetime in minutes.
    #[serde(default = "default_reset_ttl")]
    pub reset_ttl_minutes: u64,

    /// Minimum accepted password length.
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Auth cookie settings.
    #[serde(default)]
    pub cookie: CookieConfig,

    /// JSON-RPC methods callable without a token.
    #[serde(default = "default_public_methods")]
    pub public_methods: Vec<String>,

    /// Seconds between background prune runs. 0 disables pruning.
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,

    /// Login attempts allowed per email per minute.
    #[serde(default = "default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

const fn default_verification_ttl() -> u64 {
    DEFAULT_VERIFICATION_TTL_HOURS
}

const fn default_reset_ttl() -> u64 {
    DEFAULT_RESET_TTL_MINUTES
}

const fn default_min_password_length() -> usize {
    DEFAULT_MIN_PASSWORD_LENGTH
}

const fn default_prune_interval() -> u64 {
    DEFAULT_PRUNE_INTERVAL_SECS
}

const fn default_login_attempts() -> u32 {
    DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE
}

fn default_public_methods() -> Vec<String> {
    [
        "auth.register",
        "auth.login",
        "auth.logout",
        "auth.sendVerification",
        "auth.verify",
        "auth.forgotPassword",
        "auth.resetPassword",
        "system.health",
        "system.version",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            allow_dev_secret: false,
            issuer: default_issuer(),
            token_ttl_minutes: None,
            verification_ttl_hours: default_verification_ttl(),
            reset_ttl_minutes: default_reset_ttl(),
            min_password_length: default_min_password_length(),
            cookie: CookieConfig::default(),
            public_methods: default_public_methods(),
            prune_interval_secs: default_prune_interval(),
            login_attempts_per_minute: default_login_attempts(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("allow_dev_secret", &self.allow_dev_secret)
            .field("issuer", &self.issuer)
            .field("token_ttl", &self.token_ttl())
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Create a new auth config builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Identity token lifetime, falling back to [`DEFAULT_TOKEN_TTL`].
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        match self.token_ttl_minutes {
            Some(minutes) if minutes > 0 => Duration::from_secs(minutes * 60),
            _ => DEFAULT_TOKEN_TTL,
        }
    }

    /// Verification token lifetime.
    #[must_use]
    pub const fn verification_ttl(&self) -> Duration {
        Duration::from_secs(self.verification_ttl_hours * 3600)
    }

    /// Password reset token lifetime.
    #[must_use]
    pub const fn reset_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_ttl_minutes * 60)
    }

    /// Background prune interval, `None` when disabled.
    #[must_use]
    pub const fn prune_interval(&self) -> Option<Duration> {
        if self.prune_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.prune_interval_secs))
        }
    }

    /// Check if a method is public (doesn't require auth).
    #[must_use]
    pub fn is_public_method(&self, method: &str) -> bool {
        self.public_methods.iter().any(|m| m == method)
    }

    /// Resolve the signing secret.
    ///
    /// # Errors
    ///
    /// Returns `MissingSecret` when no secret is configured and the development
    /// fallback is not allowed.
    pub fn signing_secret(&self) -> Result<SigningSecret, MissingSecret> {
        match self.jwt_secret.as_deref().map(str::trim) {
            Some(secret) if !secret.is_empty() => {
                Ok(SigningSecret::from_string(secret.to_string()))
            }
            _ if self.allow_dev_secret => {
                tracing::warn!("Using the development signing secret; do not deploy this");
                Ok(SigningSecret::new(DEV_SECRET.as_bytes()))
            }
            _ => Err(MissingSecret),
        }
    }

    /// Apply environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("WARDEN_JWT_SECRET") {
            if !secret.trim().is_empty() {
                self.jwt_secret = Some(secret);
            }
        }

        if std::env::var("WARDEN_ALLOW_DEV_SECRET")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            self.allow_dev_secret = true;
        }

        if let Some(minutes) = std::env::var("WARDEN_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.token_ttl_minutes = Some(minutes);
        }

        self
    }
}

/// `SameSite` attribute for the auth cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    /// Sent only on same-site requests.
    Strict,
    /// Sent on same-site requests and top-level navigations.
    #[default]
    Lax,
    /// Sent on every request; requires `secure`.
    None,
}

impl SameSite {
    /// Attribute value as written in a `Set-Cookie` header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// HTTP-only cookie that carries the identity token for browser clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieConfig {
    /// Cookie name.
    #[serde(default = "default_cookie_name")]
    pub name: String,
    /// Set the `Secure` attribute.
    #[serde(default = "default_true")]
    pub secure: bool,
    /// `SameSite` attribute.
    #[serde(default)]
    pub same_site: SameSite,
    /// Cookie path.
    #[serde(default = "default_cookie_path")]
    pub path: String,
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_cookie_path() -> String {
    "/".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: default_cookie_name(),
            secure: true,
            same_site: SameSite::default(),
            path: default_cookie_path(),
        }
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the signing secret.
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = Some(secret.into());
        self
    }

    /// Allow the development secret fallback.
    #[must_use]
    pub const fn allow_dev_secret(mut self, allow: bool) -> Self {
        self.config.allow_dev_secret = allow;
        self
    }

    /// Set the token issuer.
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = issuer.into();
        self
    }

    /// Set token TTL in minutes.
    #[must_use]
    pub const fn token_ttl_minutes(mut self, minutes: u64) -> Self {
        self.config.token_ttl_minutes = Some(minutes);
        self
    }

    /// Set the verification token TTL in hours.
    #[must_use]
    pub const fn verification_ttl_hours(mut self, hours: u64) -> Self {
        self.config.verification_ttl_hours = hours;
        self
    }

    /// Set the reset token TTL in minutes.
    #[must_use]
    pub const fn reset_ttl_minutes(mut self, minutes: u64) -> Self {
        self.config.reset_ttl_minutes = minutes;
        self
    }

    /// Set the minimum password length.
    #[must_use]
    pub const fn min_password_length(mut self, len: usize) -> Self {
        self.config.min_password_length = len;
        self
    }

    /// Set the auth cookie name.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.config.cookie.name = name.into();
        self
    }

    /// Set the prune interval in seconds.
    #[must_use]
    pub const fn prune_interval_secs(mut self, secs: u64) -> Self {
        self.config.prune_interval_secs = secs;
        self
    }

    /// Set the login attempts allowed per minute.
    #[must_use]
    pub const fn login_attempts_per_minute(mut self, attempts: u32) -> Self {
        self.config.login_attempts_per_minute = attempts;
        self
    }

    /// Add a public method (doesn't require auth).
    #[must_use]
    pub fn public_method(mut self, method: impl Into<String>) -> Self {
        self.config.public_methods.push(method.into());
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert!(config.jwt_secret.is_none());
        assert!(!config.allow_dev_secret);
        assert_eq!(config.issuer, "warden");
        assert_eq!(config.cookie.name, "warden_auth");
        assert_eq!(config.min_password_length, 6);
    }

    #[test]
    fn test_token_ttl_fallback() {
        let config = AuthConfig::default();
        assert_eq!(config.token_ttl(), DEFAULT_TOKEN_TTL);

        let zero = AuthConfig::builder().token_ttl_minutes(0).build();
        assert_eq!(zero.token_ttl(), DEFAULT_TOKEN_TTL);

        let custom = AuthConfig::builder().token_ttl_minutes(90).build();
        assert_eq!(custom.token_ttl(), Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_single_use_ttls() {
        let config = AuthConfig::default();
        assert_eq!(config.verification_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.reset_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_secret_is_an_error() {
        let config = AuthConfig::default();
        assert_eq!(config.signing_secret().unwrap_err(), MissingSecret);

        let blank = AuthConfig::builder().jwt_secret("   ").build();
        assert!(blank.signing_secret().is_err());
    }

    #[test]
    fn test_dev_secret_fallback() {
        let config = AuthConfig::builder().allow_dev_secret(true).build();
        let secret = config.signing_secret().unwrap();
        assert_eq!(secret.expose(), DEV_SECRET.as_bytes());
    }

    #[test]
    fn test_configured_secret_wins() {
        let config = AuthConfig::builder()
            .jwt_secret("configured-secret")
            .allow_dev_secret(true)
            .build();
        assert_eq!(config.signing_secret().unwrap().expose(), b"configured-secret");
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = AuthConfig::builder().jwt_secret("hunter22").build();
        assert!(!format!("{config:?}").contains("hunter22"));
    }

    #[test]
    fn test_public_methods() {
        let config = AuthConfig::default();
        assert!(config.is_public_method("auth.login"));
        assert!(!config.is_public_method("auth.me"));
        assert!(!config.is_public_method("rbac.assign"));
    }

    #[test]
    fn test_prune_interval() {
        assert!(AuthConfig::default().prune_interval().is_some());
        let off = AuthConfig::builder().prune_interval_secs(0).build();
        assert!(off.prune_interval().is_none());
    }
}
