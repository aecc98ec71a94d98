//! Revoked token deny-list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// A revoked token identifier, kept until the token would have expired anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedToken {
    /// Token identifier.
    pub jti: String,
    /// Natural expiry of the revoked token.
    pub expires_at: DateTime<Utc>,
    /// When the revocation was recorded.
    pub created_at: DateTime<Utc>,
}

/// Durable deny-list keyed by `jti`.
pub struct RevocationStore {
    tree: sled::Tree,
}

impl RevocationStore {
    /// Open the revocation tree on an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if tree cannot be opened.
    pub fn with_db(db: &sled::Db) -> Result<Self, AuthError> {
        let tree = db
            .open_tree("revoked_tokens")
            .map_err(|e| AuthError::Storage(format!("Failed to open revoked_tokens tree: {e}")))?;
        Ok(Self { tree })
    }

    /// Revoke a token until `expires_at`.
    ///
    /// Upsert: revoking an already-revoked `jti` refreshes its expiry and is
    /// not an error. An empty `jti` is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn revoke(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        if jti.is_empty() {
            return Ok(());
        }

        let record = RevokedToken {
            jti: jti.to_string(),
            expires_at,
            created_at: Utc::now(),
        };
        let value = serde_json::to_vec(&record)
            .map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))?;

        let previous = self
            .tree
            .insert(jti.as_bytes(), value)
            .map_err(|e| AuthError::Storage(format!("Revoke error: {e}")))?;

        self.tree
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;

        if previous.is_none() {
            tracing::info!(jti = %jti, expires_at = %expires_at, "Token revoked");
        } else {
            tracing::debug!(jti = %jti, "Token already revoked");
        }
        Ok(())
    }

    /// Whether `jti` is on the deny-list.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn is_revoked(&self, jti: &str) -> Result<bool, AuthError> {
        if jti.is_empty() {
            return Ok(false);
        }
        self.tree
            .contains_key(jti.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Lookup error: {e}")))
    }

    /// Fetch the revocation record for `jti`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn get(&self, jti: &str) -> Result<Option<RevokedToken>, AuthError> {
        self.tree
            .get(jti.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Get error: {e}")))?
            .map(|value| {
                serde_json::from_slice(&value)
                    .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
            })
            .transpose()
    }

    /// Delete records whose token expired before `now`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut removed = 0;

        for entry in self.tree.iter() {
            let (key, value) = entry.map_err(|e| AuthError::Storage(format!("Iter error: {e}")))?;
            let record: RevokedToken = match serde_json::from_slice(&value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable revocation record");
                    continue;
                }
            };

            if now > record.expires_at && self.remove_unchanged(&key, &value)? {
                removed += 1;
            }
        }

        if removed > 0 {
            self.tree
                .flush()
                .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;
        }
        Ok(removed)
    }

    /// Remove `key` only if it still holds `seen`. A concurrent re-revoke
    /// with a later expiry survives.
    fn remove_unchanged(&self, key: &[u8], seen: &sled::IVec) -> Result<bool, AuthError> {
        let swapped = self
            .tree
            .compare_and_swap(key, Some(seen), None::<&[u8]>)
            .map_err(|e| AuthError::Storage(format!("Remove error: {e}")))?;
        Ok(swapped.is_ok())
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the deny-list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl std::fmt::Debug for RevocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationStore")
            .field("entries", &self.len())
            .finish()
    }
}
