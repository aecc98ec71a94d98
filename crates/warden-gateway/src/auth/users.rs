//! User model and storage.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};

use super::AuthError;

/// User account, keyed by normalized email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Normalized email. Stable identifier referenced by role assignments.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Argon2 password hash (stored in DB, not exposed in public API).
    pub password_hash: String,
    /// Bypasses every permission check.
    #[serde(default)]
    pub is_superuser: bool,
    /// When the email address was verified.
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user. `email` must already be normalized.
    ///
    /// # Errors
    ///
    /// Returns error if password hashing fails.
    pub fn new(
        email: impl Into<String>,
        password: &str,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let now = Utc::now();
        Ok(Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            password_hash: hash_password(password)?,
            is_superuser: false,
            verified_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Check a password against this user's hash.
    #[must_use]
    pub fn verify_password(&self, password: &str) -> bool {
        verify_password(password, &self.password_hash)
    }

    /// Replace the password hash with one from [`hash_password`].
    pub fn set_password_hash(&mut self, hash: &str) {
        self.password_hash = hash.to_string();
        self.updated_at = Utc::now();
    }

    /// Whether the email has been verified.
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    /// Create a safe version of user for API responses (no password hash).
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            is_superuser: self.is_superuser,
            verified: self.is_verified(),
            created_at: self.created_at,
        }
    }
}

/// Public user representation (for API responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    /// Email address.
    pub email: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Superuser flag.
    pub is_superuser: bool,
    /// Whether the email is verified.
    pub verified: bool,
    /// When created.
    pub created_at: DateTime<Utc>,
}

/// User persistence used by the auth core.
pub trait UserRepository: Send + Sync {
    /// Look up a user by normalized email.
    ///
    /// # Errors
    ///
    /// Returns `Storage` on store failure.
    fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    /// Insert a new user.
    ///
    /// # Errors
    ///
    /// Returns `UserExists` if the email is taken.
    fn insert(&self, user: &User) -> Result<(), AuthError>;

    /// Apply `change` to the stored user and write the result back.
    ///
    /// The write only lands if the record is unchanged since it was read;
    /// otherwise `change` runs again on the fresh record. `change` must not
    /// touch `email`. Returns the stored user.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if the user does not exist.
    fn update(&self, email: &str, change: &mut dyn FnMut(&mut User)) -> Result<User, AuthError>;

    /// Move a user to a new email.
    ///
    /// Role assignments are not touched; migrating them is a separate step.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` for an unknown old email and `UserExists` if
    /// the new email is taken.
    fn rename(&self, old_email: &str, new_email: &str) -> Result<User, AuthError>;
}

/// User store backed by sled.
pub struct UserStore {
    tree: sled::Tree,
}

impl UserStore {
    /// Create a user store on an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if tree cannot be opened.
    pub fn with_db(db: &sled::Db) -> Result<Self, AuthError> {
        let tree = db
            .open_tree("users")
            .map_err(|e| AuthError::Storage(format!("Failed to open users tree: {e}")))?;

        Ok(Self { tree })
    }

    /// Check if any users exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Count total users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tree.len()
    }

    /// List all users, ordered by email.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn list(&self) -> Result<Vec<User>, AuthError> {
        self.tree
            .iter()
            .values()
            .map(|value| {
                let value = value.map_err(|e| AuthError::Storage(format!("Iter error: {e}")))?;
                decode(&value)
            })
            .collect()
    }

    fn flush(&self) -> Result<(), AuthError> {
        self.tree
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;
        Ok(())
    }
}

impl UserRepository for UserStore {
    fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        match self.tree.get(email.as_bytes()) {
            Ok(Some(value)) => decode(&value).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("Get error: {e}"))),
        }
    }

    fn insert(&self, user: &User) -> Result<(), AuthError> {
        let value = encode(user)?;

        // Only succeeds when the key is absent.
        self.tree
            .compare_and_swap(user.email.as_bytes(), None::<&[u8]>, Some(value))
            .map_err(|e| AuthError::Storage(format!("Insert error: {e}")))?
            .map_err(|_| AuthError::UserExists(user.email.clone()))?;

        self.flush()
    }

    fn update(&self, email: &str, change: &mut dyn FnMut(&mut User)) -> Result<User, AuthError> {
        loop {
            let current = self
                .tree
                .get(email.as_bytes())
                .map_err(|e| AuthError::Storage(format!("Get error: {e}")))?
                .ok_or_else(|| AuthError::AccountNotFound(email.to_string()))?;

            let mut user = decode(&current)?;
            change(&mut user);
            user.email = email.to_string();
            let value = encode(&user)?;

            let swapped = self
                .tree
                .compare_and_swap(email.as_bytes(), Some(&current), Some(value))
                .map_err(|e| AuthError::Storage(format!("Update error: {e}")))?;
            if swapped.is_ok() {
                self.flush()?;
                return Ok(user);
            }
            tracing::debug!(email = %email, "User changed during update, retrying");
        }
    }

    fn rename(&self, old_email: &str, new_email: &str) -> Result<User, AuthError> {
        let renamed = self
            .tree
            .transaction(|tx| {
                let Some(current) = tx.get(old_email.as_bytes())? else {
                    return Err(ConflictableTransactionError::Abort(
                        AuthError::AccountNotFound(old_email.to_string()),
                    ));
                };
                if tx.get(new_email.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(AuthError::UserExists(
                        new_email.to_string(),
                    )));
                }

                let mut user = decode(&current).map_err(ConflictableTransactionError::Abort)?;
                user.email = new_email.to_string();
                user.updated_at = Utc::now();
                let value = encode(&user).map_err(ConflictableTransactionError::Abort)?;

                tx.remove(old_email.as_bytes())?;
                tx.insert(new_email.as_bytes(), value)?;
                Ok(user)
            })
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => AuthError::Storage(format!("Rename error: {err}")),
            })?;

        self.flush()?;
        tracing::info!(old = %old_email, new = %new_email, "User email changed");
        Ok(renamed)
    }
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("users", &self.count())
            .finish()
    }
}

fn encode(user: &User) -> Result<Vec<u8>, AuthError> {
    serde_json::to_vec(user).map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))
}

fn decode(bytes: &[u8]) -> Result<User, AuthError> {
    serde_json::from_slice(bytes)
        .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns error if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Config(format!("Password hashing failed: {e}")))
}

/// Verify a password against a PHC hash string. A malformed hash never verifies.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password hash is not a valid PHC string");
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(email: &str) -> User {
        User::new(email, "password123", "Ada", "Lovelace").unwrap()
    }

    fn store(dir: &TempDir) -> UserStore {
        let db = sled::open(dir.path()).unwrap();
        UserStore::with_db(&db).unwrap()
    }

    #[test]
    fn test_user_creation() {
        let user = user("a@x.com");
        assert_eq!(user.email, "a@x.com");
        assert!(!user.is_superuser);
        assert!(!user.is_verified());
        assert!(user.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn test_password_verification() {
        let mut user = user("a@x.com");
        assert!(user.verify_password("password123"));
        assert!(!user.verify_password("wrongpassword"));

        user.set_password_hash(&hash_password("new-password").unwrap());
        assert!(user.verify_password("new-password"));
        assert!(!user.verify_password("password123"));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_public_user_has_no_hash() {
        let json = serde_json::to_string(&user("a@x.com").to_public()).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"verified\":false"));
    }

    #[test]
    fn test_user_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        assert!(store.is_empty());

        store.insert(&user("a@x.com")).unwrap();
        assert_eq!(store.count(), 1);

        let loaded = store.get_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(loaded.first_name, "Ada");
        assert!(store.get_by_email("b@x.com").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_user() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.insert(&user("a@x.com")).unwrap();
        let result = store.insert(&user("a@x.com"));
        assert!(matches!(result, Err(AuthError::UserExists(_))));
    }

    #[test]
    fn test_update() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        assert!(matches!(
            store.update("a@x.com", &mut |u| u.is_superuser = true),
            Err(AuthError::AccountNotFound(_))
        ));

        store.insert(&user("a@x.com")).unwrap();
        let updated = store
            .update("a@x.com", &mut |u| u.is_superuser = true)
            .unwrap();
        assert!(updated.is_superuser);
        assert!(store.get_by_email("a@x.com").unwrap().unwrap().is_superuser);
    }

    #[test]
    fn test_update_keeps_concurrent_write() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.insert(&user("a@x.com")).unwrap();
        let new_hash = hash_password("reset-password").unwrap();

        // A password reset lands between the read and the write of a
        // verification update, which must then retry on the new record.
        let mut runs = 0;
        store
            .update("a@x.com", &mut |u| {
                runs += 1;
                if runs == 1 {
                    store
                        .update("a@x.com", &mut |inner| inner.set_password_hash(&new_hash))
                        .unwrap();
                }
                u.verified_at = Some(Utc::now());
            })
            .unwrap();

        assert_eq!(runs, 2);
        let stored = store.get_by_email("a@x.com").unwrap().unwrap();
        assert!(stored.is_verified());
        assert!(stored.verify_password("reset-password"));
        assert!(!stored.verify_password("password123"));
    }

    #[test]
    fn test_update_cannot_move_email() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        store.insert(&user("a@x.com")).unwrap();

        let updated = store
            .update("a@x.com", &mut |u| u.email = "b@x.com".to_string())
            .unwrap();
        assert_eq!(updated.email, "a@x.com");
        assert!(store.get_by_email("b@x.com").unwrap().is_none());
    }

    #[test]
    fn test_rename() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.insert(&user("old@x.com")).unwrap();
        store.insert(&user("taken@x.com")).unwrap();

        assert!(matches!(
            store.rename("old@x.com", "taken@x.com"),
            Err(AuthError::UserExists(_))
        ));
        assert!(matches!(
            store.rename("missing@x.com", "new@x.com"),
            Err(AuthError::AccountNotFound(_))
        ));

        let renamed = store.rename("old@x.com", "new@x.com").unwrap();
        assert_eq!(renamed.email, "new@x.com");
        assert!(store.get_by_email("old@x.com").unwrap().is_none());
        assert!(renamed.verify_password("password123"));
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_list_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.insert(&user("b@x.com")).unwrap();
        store.insert(&user("a@x.com")).unwrap();

        let emails: Vec<_> = store.list().unwrap().into_iter().map(|u| u.email).collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
    }
}
