//! Warden CLI - run the auth gateway and administer its stores.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use warden_core::Config;
use warden_core::config::LogFormat;

use commands::Context;
use commands::admin::AdminAction;
use commands::roles::RolesAction;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - token authentication and role-based access control")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the auth database
    #[arg(long, global = true, env = "WARDEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Account management
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },

    /// Roles and permissions
    Roles {
        #[command(subcommand)]
        action: RolesCommands,
    },

    /// Signing secret management
    Secret {
        #[command(subcommand)]
        action: SecretCommands,
    },

    /// Remove expired revocations and single-use tokens
    Prune,
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Create a new account
    Create {
        /// Email address
        #[arg(long)]
        email: String,

        /// Password (or use --generate-password)
        #[arg(long)]
        password: Option<String>,

        /// First name
        #[arg(long, default_value = "Admin")]
        first_name: String,

        /// Last name
        #[arg(long, default_value = "User")]
        last_name: String,

        /// Mark the account as superuser
        #[arg(long)]
        superuser: bool,

        /// Generate a random password
        #[arg(long)]
        generate_password: bool,
    },

    /// List all accounts
    List {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Grant or revoke the superuser flag
    SetSuperuser {
        /// Email address
        #[arg(long)]
        email: String,

        /// Clear the flag instead of setting it
        #[arg(long)]
        revoke: bool,
    },

    /// Reset an account's password
    ResetPassword {
        /// Email address
        #[arg(long)]
        email: String,

        /// New password; a random one is generated when omitted
        #[arg(long)]
        password: Option<String>,
    },
}

#[derive(Subcommand)]
enum RolesCommands {
    /// Create a role if missing
    Ensure {
        /// Role name
        role: String,
    },

    /// Assign a role to an account
    Assign {
        /// Email address
        #[arg(long)]
        email: String,

        /// Role name
        #[arg(long)]
        role: String,
    },

    /// Grant a role an action on a resource
    Grant {
        /// Role name
        #[arg(long)]
        role: String,

        /// Resource name
        #[arg(long)]
        resource: String,

        /// Action name
        #[arg(long)]
        action: String,
    },

    /// Check whether an account may perform an action
    Check {
        /// Email address
        #[arg(long)]
        email: String,

        /// Resource name
        #[arg(long)]
        resource: String,

        /// Action name
        #[arg(long)]
        action: String,
    },

    /// List roles and their grants, or one account's roles
    List {
        /// Show roles assigned to this account
        #[arg(long)]
        email: Option<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SecretCommands {
    /// Generate a new signing secret
    Generate {
        /// Store the secret in the config file instead of printing it
        #[arg(long)]
        write: bool,
    },
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load_default() {
        Ok(config) => config,
        Err(e) => {
            ui::error(&format!("Failed to load {}: {e}", Config::default_path().display()));
            return Err(e.into());
        }
    };

    init_logging(cli.verbose || config.settings.debug, config.settings.log_format);

    let ctx = Context::new(config, cli.data_dir);

    match cli.command {
        Commands::Serve { port, bind } => {
            commands::run_serve(&ctx, commands::serve::ServeArgs { port, bind }).await?;
        }

        Commands::Admin { action } => {
            let action = match action {
                AdminCommands::Create {
                    email,
                    password,
                    first_name,
                    last_name,
                    superuser,
                    generate_password,
                } => AdminAction::Create {
                    email,
                    password,
                    first_name,
                    last_name,
                    superuser,
                    generate_password,
                },
                AdminCommands::List { json } => AdminAction::List { json },
                AdminCommands::SetSuperuser { email, revoke } => {
                    AdminAction::SetSuperuser { email, revoke }
                }
                AdminCommands::ResetPassword { email, password } => {
                    AdminAction::ResetPassword { email, password }
                }
            };
            commands::run_admin(&ctx, action)?;
        }

        Commands::Roles { action } => {
            let action = match action {
                RolesCommands::Ensure { role } => RolesAction::Ensure { role },
                RolesCommands::Assign { email, role } => RolesAction::Assign { email, role },
                RolesCommands::Grant {
                    role,
                    resource,
                    action,
                } => RolesAction::Grant {
                    role,
                    resource,
                    action,
                },
                RolesCommands::Check {
                    email,
                    resource,
                    action,
                } => RolesAction::Check {
                    email,
                    resource,
                    action,
                },
                RolesCommands::List { email, json } => RolesAction::List { email, json },
            };
            commands::run_roles(&ctx, action)?;
        }

        Commands::Secret { action } => match action {
            SecretCommands::Generate { write } => commands::run_secret(&ctx, write)?,
        },

        Commands::Prune => commands::run_prune(&ctx)?,
    }

    Ok(())
}
