//! Input validation and normalization.
//!
//! Every externally supplied email, password, and name passes through here
//! before it reaches a store.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use validator::ValidateEmail;

/// Validation error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was empty or whitespace.
    #[error("{0} is required")]
    Required(&'static str),

    /// Email address failed syntax checks.
    #[error("invalid email")]
    InvalidEmail,

    /// Password shorter than the configured minimum.
    #[error("password too short (minimum {min} characters)")]
    PasswordTooShort {
        /// Minimum accepted length.
        min: usize,
    },

    /// Input exceeds maximum allowed length.
    #[error("{field} exceeds maximum length ({max})")]
    TooLong {
        /// Offending field.
        field: &'static str,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Size limits per input type.
pub mod limits {
    /// Maximum email length (RFC 5321 path limit).
    pub const MAX_EMAIL_LENGTH: usize = 254;

    /// Maximum password length accepted for hashing.
    pub const MAX_PASSWORD_LENGTH: usize = 1024;

    /// Maximum length of a first or last name.
    pub const MAX_NAME_LENGTH: usize = 128;

    /// Default minimum password length.
    pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 6;
}

/// Canonical form of an email: NFKC-normalized, trimmed, lower-cased.
///
/// This is the key every store uses, so two spellings of the same address
/// always resolve to one identity.
#[must_use]
pub fn normalize_email(input: &str) -> String {
    input.trim().nfkc().collect::<String>().to_lowercase()
}

/// Normalize and validate an email address.
///
/// # Errors
///
/// Returns `Required` for blank input, `TooLong` past the address limit, and
/// `InvalidEmail` when the syntax check fails.
pub fn validate_email(input: &str) -> Result<String, ValidationError> {
    let email = normalize_email(input);
    if email.is_empty() {
        return Err(ValidationError::Required("email"));
    }
    if email.len() > limits::MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong {
            field: "email",
            max: limits::MAX_EMAIL_LENGTH,
        });
    }
    if !email.validate_email() {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(email)
}

/// Check a new password against length bounds.
///
/// Length is counted in characters, not bytes.
///
/// # Errors
///
/// Returns `PasswordTooShort` or `TooLong`.
pub fn validate_password(password: &str, min_len: usize) -> Result<(), ValidationError> {
    let len = password.trim().chars().count();
    if len < min_len {
        return Err(ValidationError::PasswordTooShort { min: min_len });
    }
    if password.len() > limits::MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong {
            field: "password",
            max: limits::MAX_PASSWORD_LENGTH,
        });
    }
    Ok(())
}

/// Trim a required free-text field and strip control characters.
///
/// # Errors
///
/// Returns `Required` if nothing is left, `TooLong` past `MAX_NAME_LENGTH`.
pub fn require_non_empty(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .nfkc()
        .collect();

    if cleaned.is_empty() {
        return Err(ValidationError::Required(field));
    }
    if cleaned.chars().count() > limits::MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: limits::MAX_NAME_LENGTH,
        });
    }
    Ok(cleaned)
}
