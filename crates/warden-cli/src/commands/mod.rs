//! CLI command implementations.

pub mod admin;
pub mod prune;
pub mod roles;
pub mod secret;
pub mod serve;

use std::path::PathBuf;

use anyhow::Context as _;
use warden_core::Config;
use warden_gateway::AuthStores;

pub use admin::run_admin;
pub use prune::run_prune;
pub use roles::run_roles;
pub use secret::run_secret;
pub use serve::run_serve;

/// Loaded configuration plus the resolved data directory.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration.
    pub config: Config,
    /// Directory holding the auth database.
    pub data_dir: PathBuf,
}

impl Context {
    /// Resolve the data directory: flag, then config file, then platform default.
    pub fn new(config: Config, data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir
            .or_else(|| config.gateway.data_dir.clone())
            .unwrap_or_else(Config::data_dir);
        Self { config, data_dir }
    }

    /// Open the auth stores without touching the signing secret.
    pub fn open_stores(&self) -> anyhow::Result<AuthStores> {
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data dir {}", self.data_dir.display())
        })?;
        AuthStores::open(&self.data_dir)
            .map_err(|e| anyhow::anyhow!("Failed to open auth database: {e}"))
    }
}
