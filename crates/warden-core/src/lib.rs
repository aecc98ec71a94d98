//! # Warden Core
//!
//! Configuration, validation, and secret types shared by the Warden crates.
//!
//! This crate provides:
//! - Configuration loading and validation (JSON5 format)
//! - Email and password validation with Unicode normalization
//! - A signing-secret wrapper that never leaks into logs

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod secrets;
pub mod validation;

pub use config::{AuthConfig, Config, ConfigError};
pub use secrets::{SigningSecret, scrub_secrets};
pub use validation::{ValidationError, normalize_email, validate_email};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AuthConfig, Config};
    pub use crate::secrets::SigningSecret;
    pub use crate::validation::{normalize_email, validate_email, validate_password};
}
