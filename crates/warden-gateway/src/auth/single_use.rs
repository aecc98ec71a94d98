//! Single-use, time-limited tokens for email verification and password reset.
//!
//! Consumption is exactly-once: the used-at mark is written with a
//! compare-and-swap against the unused record, so when several requests race
//! on the same token only one swap lands and every other caller re-reads a
//! used record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;
/// Attempts before giving up on finding an unused token value.
const MAX_CREATE_ATTEMPTS: usize = 5;

/// What a single-use token may be spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    /// Email verification.
    Verification,
    /// Password reset.
    PasswordReset,
}

impl std::fmt::Display for TokenPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verification => write!(f, "verification"),
            Self::PasswordReset => write!(f, "password_reset"),
        }
    }
}

/// Persisted single-use token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleUseToken {
    /// Opaque random token value.
    pub token: String,
    /// Subject email.
    pub email: String,
    /// Purpose tag.
    pub purpose: TokenPurpose,
    /// Expiry.
    pub expires_at: DateTime<Utc>,
    /// When the token was consumed. Once set, never cleared.
    pub used_at: Option<DateTime<Utc>>,
    /// When the token was created.
    pub created_at: DateTime<Utc>,
}

impl SingleUseToken {
    /// Whether the token has been consumed.
    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Whether the token is past its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Durable store of single-use tokens, one sled tree keyed by token value.
pub struct SingleUseTokenStore {
    tree: sled::Tree,
}

impl SingleUseTokenStore {
    /// Open the single-use token tree on an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if tree cannot be opened.
    pub fn with_db(db: &sled::Db) -> Result<Self, AuthError> {
        let tree = db.open_tree("single_use_tokens").map_err(|e| {
            AuthError::Storage(format!("Failed to open single_use_tokens tree: {e}"))
        })?;
        Ok(Self { tree })
    }

    /// Create a token for `email` valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails or no unused token value could be found.
    pub fn create(
        &self,
        email: &str,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<SingleUseToken, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::Config(format!("Invalid token TTL: {e}")))?;

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let record = SingleUseToken {
                token: random_token(),
                email: email.to_string(),
                purpose,
                expires_at: now + ttl,
                used_at: None,
                created_at: now,
            };

            let swapped = self
                .tree
                .compare_and_swap(record.token.as_bytes(), None::<&[u8]>, Some(encode(&record)?))
                .map_err(|e| AuthError::Storage(format!("Insert error: {e}")))?;

            if swapped.is_ok() {
                self.flush()?;
                tracing::debug!(email = %email, purpose = %purpose, "Created single-use token");
                return Ok(record);
            }

            tracing::warn!(attempt, "Single-use token collision, regenerating");
        }

        Err(AuthError::Storage(
            "could not generate a unique single-use token".to_string(),
        ))
    }

    /// Spend a token and return its subject email.
    ///
    /// # Errors
    ///
    /// Returns `SingleUseTokenNotFound` for unknown tokens and purpose
    /// mismatches, `SingleUseTokenAlreadyUsed` once spent, and
    /// `SingleUseTokenExpired` past expiry.
    pub fn consume(&self, token: &str, purpose: TokenPurpose) -> Result<String, AuthError> {
        self.consume_at(token, purpose, Utc::now())
    }

    pub(crate) fn consume_at(
        &self,
        token: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        if token.is_empty() {
            return Err(AuthError::SingleUseTokenNotFound);
        }

        loop {
            let current = self
                .tree
                .get(token.as_bytes())
                .map_err(|e| AuthError::Storage(format!("Get error: {e}")))?
                .ok_or(AuthError::SingleUseTokenNotFound)?;
            let record = decode(&current)?;

            if record.purpose != purpose {
                return Err(AuthError::SingleUseTokenNotFound);
            }
            if record.is_used() {
                return Err(AuthError::SingleUseTokenAlreadyUsed);
            }
            if record.is_expired_at(now) {
                return Err(AuthError::SingleUseTokenExpired);
            }

            let used = SingleUseToken {
                used_at: Some(now),
                ..record
            };

            let swapped = self
                .tree
                .compare_and_swap(token.as_bytes(), Some(&current), Some(encode(&used)?))
                .map_err(|e| AuthError::Storage(format!("Consume error: {e}")))?;

            match swapped {
                Ok(()) => {
                    self.flush()?;
                    tracing::info!(email = %used.email, purpose = %purpose, "Single-use token consumed");
                    return Ok(used.email);
                }
                // Lost the race; the re-read sees the winner's mark.
                Err(_) => continue,
            }
        }
    }

    /// Fetch a token record without consuming it.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn get(&self, token: &str) -> Result<Option<SingleUseToken>, AuthError> {
        self.tree
            .get(token.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Get error: {e}")))?
            .map(|value| decode(&value))
            .transpose()
    }

    /// Delete tokens past their expiry at `now`, used or not. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut removed = 0;

        for entry in self.tree.iter() {
            let (key, value) = entry.map_err(|e| AuthError::Storage(format!("Iter error: {e}")))?;
            match decode(&value) {
                Ok(record) if record.is_expired_at(now) => {
                    if self.remove_unchanged(&key, &value)? {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable single-use token"),
            }
        }

        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    /// Remove `key` only if it still holds `seen`.
    fn remove_unchanged(&self, key: &[u8], seen: &sled::IVec) -> Result<bool, AuthError> {
        let swapped = self
            .tree
            .compare_and_swap(key, Some(seen), None::<&[u8]>)
            .map_err(|e| AuthError::Storage(format!("Remove error: {e}")))?;
        Ok(swapped.is_ok())
    }

    /// Number of stored tokens, including used and expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn flush(&self) -> Result<(), AuthError> {
        self.tree
            .flush()
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for SingleUseTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleUseTokenStore")
            .field("entries", &self.len())
            .finish()
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn encode(record: &SingleUseToken) -> Result<Vec<u8>, AuthError> {
    serde_json::to_vec(record).map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))
}

fn decode(bytes: &[u8]) -> Result<SingleUseToken, AuthError> {
    serde_json::from_slice(bytes)
        .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
}
