//! Secret command - generate token signing secrets.

use anyhow::Result;
use warden_core::{Config, SigningSecret};

use super::Context;
use crate::ui;

/// Generate a signing secret, print it, and optionally store it in the config file.
///
/// # Errors
///
/// Returns error if the config file cannot be written.
pub fn run_secret(ctx: &Context, write: bool) -> Result<()> {
    let secret = SigningSecret::generate_hex();

    if !write {
        println!("{secret}");
        return Ok(());
    }

    let path = Config::default_path();
    let mut config = ctx.config.clone();
    if config.auth.jwt_secret.is_some() {
        ui::warning("Replacing the existing signing secret; issued tokens will stop validating");
    }
    config.auth.jwt_secret = Some(secret);
    config.save(&path)?;

    ui::success(&format!("Signing secret written to {}", path.display()));
    Ok(())
}
