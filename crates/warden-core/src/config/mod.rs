//! Configuration loading and validation.
//!
//! Config is JSON5 so operators can comment their files.
//! Config location: `~/.warden/warden.json`

mod auth;

pub use auth::{
    AuthConfig, AuthConfigBuilder, CookieConfig, DEFAULT_TOKEN_TTL, MissingSecret, SameSite,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server configuration.
    #[serde(default)]
    pub gateway: ServerConfig,

    /// Authentication configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Global settings.
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;

        // The file may hold the signing secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("warden.json")
    }

    /// Get the Warden state directory.
    ///
    /// Uses `WARDEN_STATE_DIR` env var if set, otherwise `~/.warden`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("WARDEN_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".warden")
        } else {
            PathBuf::from(".warden")
        }
    }

    /// Default directory for the auth database.
    #[must_use]
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("warden")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.port == 0 {
            return Err(ConfigError::Validation(
                "Gateway port cannot be 0".to_string(),
            ));
        }

        if self.auth.issuer.trim().is_empty() {
            return Err(ConfigError::Validation("auth.issuer cannot be empty".to_string()));
        }

        if self.auth.cookie.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth.cookie.name cannot be empty".to_string(),
            ));
        }

        if self.auth.cookie.same_site == SameSite::None && !self.auth.cookie.secure {
            return Err(ConfigError::Validation(
                "auth.cookie.sameSite = none requires secure cookies".to_string(),
            ));
        }

        if self.auth.min_password_length == 0 {
            return Err(ConfigError::Validation(
                "auth.minPasswordLength must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address mode.
    #[serde(default)]
    pub mode: BindMode,

    /// Enable CORS.
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Data directory override for the auth database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mode: BindMode::default(),
            cors: true,
            timeout_secs: default_timeout(),
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// Resolve the bind address for the configured mode.
    #[must_use]
    pub fn bind_address(&self) -> String {
        match &self.mode {
            BindMode::Local => "127.0.0.1".to_string(),
            BindMode::Public => "0.0.0.0".to_string(),
            BindMode::Custom(addr) => addr.clone(),
        }
    }
}

const fn default_port() -> u16 {
    18790
}

const fn default_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

/// Gateway bind mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to localhost only.
    #[default]
    Local,
    /// Bind to all interfaces.
    Public,
    /// Custom bind address.
    Custom(String),
}

/// Global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Enable debug logging.
    #[serde(default)]
    pub debug: bool,

    /// Log format.
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}
