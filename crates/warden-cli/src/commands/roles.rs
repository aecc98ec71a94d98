//! Role and permission management commands.

use anyhow::{Result, anyhow};
use serde_json::json;
use warden_core::validate_email;
use warden_gateway::auth::{AuthStores, SUPERUSER_ROLE, UserRepository};

use super::Context;
use crate::ui;

/// Role actions.
#[derive(Debug, Clone)]
pub enum RolesAction {
    /// Create a role if it does not exist.
    Ensure { role: String },
    /// Assign a role to an account.
    Assign { email: String, role: String },
    /// Grant a role an action on a resource.
    Grant {
        role: String,
        resource: String,
        action: String,
    },
    /// Check whether an account may perform an action.
    Check {
        email: String,
        resource: String,
        action: String,
    },
    /// List roles, or the roles of one account.
    List { email: Option<String>, json: bool },
}

/// Run the roles command.
///
/// # Errors
///
/// Returns error if the store rejects the operation.
pub fn run_roles(ctx: &Context, action: RolesAction) -> Result<()> {
    let stores = ctx.open_stores()?;

    match action {
        RolesAction::Ensure { role } => {
            stores.rbac.ensure_role(&role)?;
            ui::success(&format!("Role '{role}' exists"));
        }
        RolesAction::Assign { email, role } => {
            let email = validate_email(&email)?;
            if stores.users.get_by_email(&email)?.is_none() {
                ui::warning(&format!("No account for '{email}' yet; assigning anyway"));
            }
            stores.rbac.assign_role(&email, &role)?;
            ui::success(&format!("Assigned '{role}' to '{email}'"));
        }
        RolesAction::Grant {
            role,
            resource,
            action,
        } => {
            stores.rbac.grant(&role, &resource, &action)?;
            ui::success(&format!("Granted {resource}:{action} to '{role}'"));
        }
        RolesAction::Check {
            email,
            resource,
            action,
        } => {
            let email = validate_email(&email)?;
            let allowed = stores.rbac.has_permission(&email, &resource, &action)?;
            ui::verdict(allowed, &format!("{email} {resource}:{action}"));
        }
        RolesAction::List { email, json } => list(&stores, email.as_deref(), json)?,
    }

    stores
        .flush()
        .map_err(|e| anyhow!("Failed to flush auth database: {e}"))?;
    Ok(())
}

fn list(stores: &AuthStores, email: Option<&str>, json: bool) -> Result<()> {
    if let Some(email) = email {
        let email = validate_email(email)?;
        let roles = stores.rbac.roles_for(&email)?;
        if json {
            let value = json!({ "email": email, "roles": roles });
            println!("{}", serde_json::to_string_pretty(&value)?);
        } else if roles.is_empty() {
            ui::info(&format!("'{email}' has no roles"));
        } else {
            ui::header(&format!("Roles for {email}"));
            for role in roles {
                println!("  {role}");
            }
        }
        return Ok(());
    }

    let mut listing = Vec::new();
    for role in stores.rbac.list_roles()? {
        let grants = stores.rbac.grants_for(&role)?;
        listing.push((role, grants));
    }

    if json {
        let value: Vec<_> = listing
            .iter()
            .map(|(role, grants)| {
                let grants: Vec<String> = grants.iter().map(|(r, a)| format!("{r}:{a}")).collect();
                json!({ "role": role, "grants": grants })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if listing.is_empty() {
        ui::info("No roles defined.");
        return Ok(());
    }

    ui::header("Roles");
    for (role, grants) in listing {
        println!("  {role}");
        if role == SUPERUSER_ROLE {
            ui::dim("  every permission");
        }
        for (resource, action) in grants {
            ui::dim(&format!("  {resource}:{action}"));
        }
    }

    Ok(())
}
