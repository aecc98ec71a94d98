//! Admin account management commands.

use anyhow::{Result, anyhow};
use chrono::Utc;
use rand::Rng;
use warden_core::validation::{require_non_empty, validate_password};
use warden_core::validate_email;
use warden_gateway::auth::{AuthStores, PublicUser, User, UserRepository, hash_password};

use super::Context;
use crate::ui;

/// Admin actions.
#[derive(Debug, Clone)]
pub enum AdminAction {
    /// Create a new account.
    Create {
        email: String,
        password: Option<String>,
        first_name: String,
        last_name: String,
        superuser: bool,
        generate_password: bool,
    },
    /// List all accounts.
    List { json: bool },
    /// Grant or clear the superuser flag.
    SetSuperuser { email: String, revoke: bool },
    /// Reset an account's password.
    ResetPassword {
        email: String,
        password: Option<String>,
    },
}

/// Run the admin command.
///
/// # Errors
///
/// Returns error if the operation fails.
pub fn run_admin(ctx: &Context, action: AdminAction) -> Result<()> {
    let stores = ctx.open_stores()?;
    let min_len = ctx.config.auth.min_password_length;

    match action {
        AdminAction::Create {
            email,
            password,
            first_name,
            last_name,
            superuser,
            generate_password: generate,
        } => {
            let password = pick_password(password, generate, min_len)?;
            let user = create_user(&stores, &email, &password, &first_name, &last_name, superuser)?;
            ui::success(&format!("Created account '{}'", user.email));
            if superuser {
                ui::kv("Superuser", "yes");
            }
            if generate {
                ui::kv("Password", &password);
            }
        }
        AdminAction::List { json } => list_users(&stores, json)?,
        AdminAction::SetSuperuser { email, revoke } => {
            let user = set_superuser(&stores, &email, !revoke)?;
            let state = if user.is_superuser { "granted" } else { "revoked" };
            ui::success(&format!("Superuser {state} for '{}'", user.email));
        }
        AdminAction::ResetPassword { email, password } => {
            let generated = password.is_none();
            let password = pick_password(password, generated, min_len)?;
            let user = reset_password(&stores, &email, &password)?;
            ui::success(&format!("Password reset for '{}'", user.email));
            if generated {
                ui::kv("New password", &password);
            }
            ui::info("Existing sessions stay valid until they expire");
        }
    }

    stores
        .flush()
        .map_err(|e| anyhow!("Failed to flush auth database: {e}"))?;
    Ok(())
}

fn pick_password(password: Option<String>, generate: bool, min_len: usize) -> Result<String> {
    let password = match (password, generate) {
        (_, true) => generate_password(min_len.max(16)),
        (Some(password), false) => password,
        (None, false) => {
            return Err(anyhow!(
                "Password required. Use --password or --generate-password"
            ));
        }
    };
    validate_password(&password, min_len)?;
    Ok(password)
}

/// Generate a random password from an unambiguous alphabet.
fn generate_password(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#$%^&*";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Create an account directly, bypassing email verification.
fn create_user(
    stores: &AuthStores,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
    superuser: bool,
) -> Result<User> {
    let email = validate_email(email)?;
    let first_name = require_non_empty("first_name", first_name)?;
    let last_name = require_non_empty("last_name", last_name)?;
    let mut user = User::new(email, password, first_name, last_name)
        .map_err(|e| anyhow!("Failed to create account: {e}"))?;
    user.is_superuser = superuser;
    user.verified_at = Some(Utc::now());

    stores
        .users
        .insert(&user)
        .map_err(|e| anyhow!("Failed to save account: {e}"))?;
    tracing::info!(email = %user.email, superuser, "Account created from CLI");
    Ok(user)
}

fn list_users(stores: &AuthStores, json: bool) -> Result<()> {
    let users: Vec<PublicUser> = stores
        .users
        .list()
        .map_err(|e| anyhow!("Failed to list accounts: {e}"))?
        .iter()
        .map(User::to_public)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        ui::info("No accounts yet.");
        ui::info("Run 'warden admin create --email <email> --generate-password' to add one.");
        return Ok(());
    }

    ui::info(&format!("Accounts ({}):", users.len()));
    println!();
    println!(
        "{:<32} {:<24} {:<10} {:<9} {:<20}",
        "EMAIL", "NAME", "SUPERUSER", "VERIFIED", "CREATED"
    );
    println!("{}", "-".repeat(97));

    for user in users {
        let name = format!("{} {}", user.first_name, user.last_name);
        println!(
            "{:<32} {:<24} {:<10} {:<9} {:<20}",
            user.email,
            name,
            if user.is_superuser { "yes" } else { "no" },
            if user.verified { "yes" } else { "no" },
            user.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

fn find_user(stores: &AuthStores, email: &str) -> Result<User> {
    let email = validate_email(email)?;
    stores
        .users
        .get_by_email(&email)
        .map_err(|e| anyhow!("Failed to find account: {e}"))?
        .ok_or_else(|| anyhow!("Account not found: {email}"))
}

fn set_superuser(stores: &AuthStores, email: &str, superuser: bool) -> Result<User> {
    let user = find_user(stores, email)?;
    let user = stores
        .users
        .update(&user.email, &mut |user| {
            user.is_superuser = superuser;
            user.updated_at = Utc::now();
        })
        .map_err(|e| anyhow!("Failed to update account: {e}"))?;
    tracing::info!(email = %user.email, superuser, "Superuser flag changed from CLI");
    Ok(user)
}

fn reset_password(stores: &AuthStores, email: &str, password: &str) -> Result<User> {
    let user = find_user(stores, email)?;
    let hash = hash_password(password).map_err(|e| anyhow!("Failed to set password: {e}"))?;

    let user = stores
        .users
        .update(&user.email, &mut |user| user.set_password_hash(&hash))
        .map_err(|e| anyhow!("Failed to update account: {e}"))?;
    tracing::info!(email = %user.email, "Password reset from CLI");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stores() -> (TempDir, AuthStores) {
        let dir = TempDir::new().unwrap();
        let stores = AuthStores::open(dir.path()).unwrap();
        (dir, stores)
    }

    #[test]
    fn test_create_user_is_verified_and_normalized() {
        let (_dir, stores) = stores();
        let user = create_user(&stores, " Ada@Example.COM ", "password123", "Ada", "L", true)
            .unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert!(user.is_superuser);
        assert!(user.is_verified());
        assert!(stores.users.get_by_email("ada@example.com").unwrap().is_some());
    }

    #[test]
    fn test_create_duplicate_fails() {
        let (_dir, stores) = stores();
        create_user(&stores, "a@x.com", "password123", "A", "B", false).unwrap();
        assert!(create_user(&stores, "a@x.com", "password123", "A", "B", false).is_err());
    }

    #[test]
    fn test_set_superuser_round_trip() {
        let (_dir, stores) = stores();
        create_user(&stores, "a@x.com", "password123", "A", "B", false).unwrap();

        assert!(set_superuser(&stores, "a@x.com", true).unwrap().is_superuser);
        assert!(!set_superuser(&stores, "a@x.com", false).unwrap().is_superuser);
        assert!(set_superuser(&stores, "nobody@x.com", true).is_err());
    }

    #[test]
    fn test_reset_password() {
        let (_dir, stores) = stores();
        create_user(&stores, "a@x.com", "password123", "A", "B", false).unwrap();

        reset_password(&stores, "a@x.com", "new-password").unwrap();
        let user = stores.users.get_by_email("a@x.com").unwrap().unwrap();
        assert!(user.verify_password("new-password"));
        assert!(!user.verify_password("password123"));
    }

    #[test]
    fn test_pick_password() {
        assert!(pick_password(None, false, 6).is_err());
        assert!(pick_password(Some("short".to_string()), false, 6).is_err());
        assert_eq!(pick_password(Some("long enough".to_string()), false, 6).unwrap(), "long enough");
        assert_eq!(pick_password(None, true, 6).unwrap().len(), 16);
    }
}
