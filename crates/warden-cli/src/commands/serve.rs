//! Serve command - run the HTTP/JSON-RPC gateway.

use anyhow::Result;
use warden_gateway::GatewayConfig;

use super::Context;
use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Start the gateway and block until Ctrl+C.
pub async fn run_serve(ctx: &Context, args: ServeArgs) -> Result<()> {
    let mut config = GatewayConfig::from(&ctx.config);
    config.data_dir.clone_from(&ctx.data_dir);
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    // Bind-check the port so a clash is reported before the stores are opened.
    let addr = format!("{}:{}", config.bind_address, config.port);
    if std::net::TcpListener::bind(&addr).is_err() {
        ui::error(&format!("Port {} is already in use", config.port));
        anyhow::bail!("address {addr} unavailable");
    }

    ui::header("Starting Warden Gateway");
    ui::kv("Address", &addr);
    ui::kv("Data", &config.data_dir.display().to_string());
    ui::kv("Issuer", &config.auth.issuer);
    println!();
    ui::info("Press Ctrl+C to stop");

    warden_gateway::start(config).await?;

    ui::success("Gateway stopped");
    Ok(())
}
