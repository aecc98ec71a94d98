//! Prune command - drop expired revocations and single-use tokens.

use anyhow::{Result, anyhow};
use chrono::Utc;
use warden_gateway::auth::prune_once;

use super::Context;
use crate::ui;

/// Run one prune pass against the auth database.
///
/// # Errors
///
/// Returns error if the stores cannot be opened or pruned.
pub fn run_prune(ctx: &Context) -> Result<()> {
    let stores = ctx.open_stores()?;
    let report = prune_once(&stores.revocations, &stores.single_use, Utc::now())?;
    stores
        .flush()
        .map_err(|e| anyhow!("Failed to flush auth database: {e}"))?;

    ui::success("Prune complete");
    ui::kv("Revocations removed", &report.revocations.to_string());
    ui::kv("Single-use tokens removed", &report.single_use_tokens.to_string());
    ui::kv("Revocations kept", &stores.revocations.len().to_string());
    Ok(())
}
