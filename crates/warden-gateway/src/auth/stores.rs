//! The durable stores behind the auth core, opened on one database.

use std::path::Path;
use std::sync::Arc;

use super::AuthError;
use super::rbac::RbacEngine;
use super::revocation::RevocationStore;
use super::single_use::SingleUseTokenStore;
use super::users::UserStore;

/// Every store the auth core needs. None of them depend on the signing secret,
/// so admin tooling can open them without one.
#[derive(Debug, Clone)]
pub struct AuthStores {
    db: sled::Db,
    /// User accounts.
    pub users: Arc<UserStore>,
    /// Revoked token deny-list.
    pub revocations: Arc<RevocationStore>,
    /// Verification and reset tokens.
    pub single_use: Arc<SingleUseTokenStore>,
    /// Roles, assignments and grants.
    pub rbac: Arc<RbacEngine>,
}

impl AuthStores {
    /// Open the auth database under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(data_dir: &Path) -> Result<Self, AuthError> {
        let path = data_dir.join("auth");
        let db = sled::open(&path)
            .map_err(|e| AuthError::Storage(format!("Failed to open auth database: {e}")))?;
        tracing::debug!(path = %path.display(), "Opened auth database");
        Self::with_db(db)
    }

    /// Open the stores on an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if a tree cannot be opened.
    pub fn with_db(db: sled::Db) -> Result<Self, AuthError> {
        let users = Arc::new(UserStore::with_db(&db)?);
        let rbac = Arc::new(RbacEngine::with_db(&db, users.clone())?);

        Ok(Self {
            revocations: Arc::new(RevocationStore::with_db(&db)?),
            single_use: Arc::new(SingleUseTokenStore::with_db(&db)?),
            users,
            rbac,
            db,
        })
    }

    /// Flush every tree to disk.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn flush(&self) -> Result<(), AuthError> {
        self.db
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::{User, UserRepository};
    use tempfile::TempDir;

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();

        {
            let stores = AuthStores::open(dir.path()).unwrap();
            stores
                .users
                .insert(&User::new("a@x.com", "password123", "A", "B").unwrap())
                .unwrap();
            stores.rbac.assign_role("a@x.com", "Reader").unwrap();
            stores.flush().unwrap();
        }

        let stores = AuthStores::open(dir.path()).unwrap();
        assert!(stores.users.get_by_email("a@x.com").unwrap().is_some());
        assert!(stores.rbac.has_role("a@x.com", "Reader").unwrap());
    }
}
