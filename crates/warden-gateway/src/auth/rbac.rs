//! Role-based access control.
//!
//! Three sled trees hold the policy:
//!
//! | tree          | key                          |
//! |---------------|------------------------------|
//! | `roles`       | `role`                       |
//! | `user_roles`  | `email \0 role`              |
//! | `permissions` | `role \0 resource \0 action` |
//!
//! Uniqueness of assignments and grants falls out of the key layout, so every
//! write is an idempotent upsert.

use std::sync::Arc;

use chrono::Utc;

use super::AuthError;
use super::users::UserRepository;

/// Role name that bypasses all permission checks, independent of the user flag.
pub const SUPERUSER_ROLE: &str = "Superuser";

const SEP: u8 = 0;

/// Role and permission storage plus the permission decision.
pub struct RbacEngine {
    roles: sled::Tree,
    user_roles: sled::Tree,
    permissions: sled::Tree,
    users: Arc<dyn UserRepository>,
}

impl RbacEngine {
    /// Open the RBAC trees on an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if a tree cannot be opened.
    pub fn with_db(db: &sled::Db, users: Arc<dyn UserRepository>) -> Result<Self, AuthError> {
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| AuthError::Storage(format!("Failed to open {name} tree: {e}")))
        };

        Ok(Self {
            roles: open("roles")?,
            user_roles: open("user_roles")?,
            permissions: open("permissions")?,
            users,
        })
    }

    /// Create a role if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty name or storage errors.
    pub fn ensure_role(&self, name: &str) -> Result<(), AuthError> {
        check_component("role", name)?;

        let created_at = Utc::now().to_rfc3339();
        let inserted = self
            .roles
            .compare_and_swap(name.as_bytes(), None::<&[u8]>, Some(created_at.as_bytes()))
            .map_err(|e| AuthError::Storage(format!("Role insert error: {e}")))?
            .is_ok();

        if inserted {
            self.roles
                .flush()
                .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;
            tracing::info!(role = %name, "Role created");
        }
        Ok(())
    }

    /// Assign a role to a user. Creates the role if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty names or storage errors.
    pub fn assign_role(&self, email: &str, role: &str) -> Result<(), AuthError> {
        check_component("email", email)?;
        self.ensure_role(role)?;

        let previous = self
            .user_roles
            .insert(key(&[email, role]), &[])
            .map_err(|e| AuthError::Storage(format!("Assign error: {e}")))?;
        self.user_roles
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;

        if previous.is_none() {
            tracing::info!(email = %email, role = %role, "Role assigned");
        }
        Ok(())
    }

    /// Grant `action` on `resource` to a role. Creates the role if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty names or storage errors.
    pub fn grant(&self, role: &str, resource: &str, action: &str) -> Result<(), AuthError> {
        check_component("resource", resource)?;
        check_component("action", action)?;
        self.ensure_role(role)?;

        let previous = self
            .permissions
            .insert(key(&[role, resource, action]), &[])
            .map_err(|e| AuthError::Storage(format!("Grant error: {e}")))?;
        self.permissions
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;

        if previous.is_none() {
            tracing::info!(role = %role, resource = %resource, action = %action, "Permission granted");
        }
        Ok(())
    }

    /// Whether `email` holds `role`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn has_role(&self, email: &str, role: &str) -> Result<bool, AuthError> {
        if !is_valid_component(email) || !is_valid_component(role) {
            return Ok(false);
        }
        self.user_roles
            .contains_key(key(&[email, role]))
            .map_err(|e| AuthError::Storage(format!("Lookup error: {e}")))
    }

    /// Deny-by-default permission check.
    ///
    /// Allowed when any of these hold, checked in order:
    /// 1. the user's superuser flag is set
    /// 2. the user holds the role named [`SUPERUSER_ROLE`]
    /// 3. one of the user's roles has a matching `(resource, action)` grant
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn has_permission(
        &self,
        email: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, AuthError> {
        if !is_valid_component(email)
            || !is_valid_component(resource)
            || !is_valid_component(action)
        {
            return Ok(false);
        }

        if self
            .users
            .get_by_email(email)?
            .is_some_and(|user| user.is_superuser)
        {
            return Ok(true);
        }

        if self.has_role(email, SUPERUSER_ROLE)? {
            return Ok(true);
        }

        for role in self.roles_for(email)? {
            let granted = self
                .permissions
                .contains_key(key(&[&role, resource, action]))
                .map_err(|e| AuthError::Storage(format!("Lookup error: {e}")))?;
            if granted {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Like [`has_permission`](Self::has_permission) but fails with `Forbidden`.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` when the check fails, or a storage error.
    pub fn require_permission(
        &self,
        email: &str,
        resource: &str,
        action: &str,
    ) -> Result<(), AuthError> {
        if self.has_permission(email, resource, action)? {
            Ok(())
        } else {
            tracing::debug!(email = %email, resource = %resource, action = %action, "Permission denied");
            Err(AuthError::Forbidden {
                resource: resource.to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Move every role assignment from `old_email` to `new_email` in one batch.
    ///
    /// Must be called explicitly after an email change; user updates never
    /// cascade here. The account must already live at `new_email`, so roles
    /// never land on an address nobody owns. Returns the number of assignments moved.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty emails, `AccountNotFound` when no
    /// account owns `new_email`, or storage errors.
    pub fn migrate_role_assignments(
        &self,
        old_email: &str,
        new_email: &str,
    ) -> Result<usize, AuthError> {
        check_component("email", old_email)?;
        check_component("email", new_email)?;
        if old_email == new_email {
            return Ok(0);
        }
        if self.users.get_by_email(new_email)?.is_none() {
            return Err(AuthError::AccountNotFound(new_email.to_string()));
        }

        let roles = self.roles_for(old_email)?;
        let mut batch = sled::Batch::default();
        for role in &roles {
            batch.remove(key(&[old_email, role]));
            batch.insert(key(&[new_email, role]), &[]);
        }

        self.user_roles
            .apply_batch(batch)
            .map_err(|e| AuthError::Storage(format!("Migration error: {e}")))?;
        self.user_roles
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;

        tracing::info!(
            old = %old_email,
            new = %new_email,
            moved = roles.len(),
            "Role assignments migrated"
        );
        Ok(roles.len())
    }

    /// Roles held by `email`, sorted.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn roles_for(&self, email: &str) -> Result<Vec<String>, AuthError> {
        let prefix = key(&[email, ""]);
        self.user_roles
            .scan_prefix(&prefix)
            .keys()
            .map(|k| {
                let k = k.map_err(|e| AuthError::Storage(format!("Scan error: {e}")))?;
                Ok(String::from_utf8_lossy(&k[prefix.len()..]).into_owned())
            })
            .collect()
    }

    /// Every known role, sorted.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn list_roles(&self) -> Result<Vec<String>, AuthError> {
        self.roles
            .iter()
            .keys()
            .map(|k| {
                let k = k.map_err(|e| AuthError::Storage(format!("Iter error: {e}")))?;
                Ok(String::from_utf8_lossy(&k).into_owned())
            })
            .collect()
    }

    /// `(resource, action)` pairs granted to `role`, sorted.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn grants_for(&self, role: &str) -> Result<Vec<(String, String)>, AuthError> {
        let prefix = key(&[role, ""]);
        self.permissions
            .scan_prefix(&prefix)
            .keys()
            .map(|k| {
                let k = k.map_err(|e| AuthError::Storage(format!("Scan error: {e}")))?;
                let rest = String::from_utf8_lossy(&k[prefix.len()..]).into_owned();
                let (resource, action) = rest
                    .split_once('\0')
                    .ok_or_else(|| AuthError::Storage("corrupt permission key".to_string()))?;
                Ok((resource.to_string(), action.to_string()))
            })
            .collect()
    }
}

impl std::fmt::Debug for RbacEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RbacEngine")
            .field("roles", &self.roles.len())
            .field("assignments", &self.user_roles.len())
            .field("grants", &self.permissions.len())
            .finish_non_exhaustive()
    }
}

/// Join components with the separator. A trailing empty part leaves a
/// trailing separator, which is what prefix scans need.
fn key(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(SEP);
        }
        out.extend_from_slice(part.as_bytes());
    }
    out
}

fn is_valid_component(value: &str) -> bool {
    !value.is_empty() && !value.as_bytes().contains(&SEP)
}

fn check_component(field: &str, value: &str) -> Result<(), AuthError> {
    if is_valid_component(value) {
        Ok(())
    } else {
        Err(AuthError::InvalidInput(format!("invalid {field}")))
    }
}
