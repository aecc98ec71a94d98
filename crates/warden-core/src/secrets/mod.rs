//! Secret handling.
//!
//! - `SigningSecret`: token signing key that never shows up in logs
//! - `scrub_secrets`: redact credentials from error messages before logging

use rand::RngCore;
use secrecy::{ExposeSecret, SecretBox};
use zeroize::Zeroize;

/// Recommended minimum length of a signing secret in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Symmetric key used to sign and verify identity tokens.
///
/// Loaded once at startup and held for the life of the process. The bytes are
/// zeroed on drop and never printed.
pub struct SigningSecret(SecretBox<[u8]>);

impl SigningSecret {
    /// Wrap raw key material.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self(SecretBox::new(bytes.to_vec().into_boxed_slice()))
    }

    /// Build a secret from a configured string, consuming and zeroing it.
    #[must_use]
    pub fn from_string(mut raw: String) -> Self {
        let secret = Self::new(raw.trim().as_bytes());
        raw.zeroize();
        secret
    }

    /// Generate 256 bits of fresh key material.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = Self::new(&bytes);
        bytes.zeroize();
        secret
    }

    /// Generate a random secret rendered as 64 hex characters, suitable for a config file.
    #[must_use]
    pub fn generate_hex() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let encoded = hex::encode(bytes);
        bytes.zeroize();
        encoded
    }

    /// Expose the key bytes. Only the token signer should call this.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    /// Length of the key in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    /// Whether the key is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    /// Whether the key meets the recommended minimum length.
    #[must_use]
    pub fn is_strong(&self) -> bool {
        self.len() >= MIN_SECRET_LEN
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningSecret([REDACTED; {} bytes])", self.len())
    }
}

/// Credential markers redacted by [`scrub_secrets`].
pub const COMMON_SECRET_PATTERNS: &[&str] = &[
    "Bearer ",
    "bearer ",
    "token=",
    "secret=",
    "password=",
    "\"token\":\"",
    "\"password\":\"",
];

/// Replace whatever follows each pattern with `[REDACTED]`.
///
/// The redacted value ends at whitespace, a quote, `&` or `,`.
#[must_use]
pub fn scrub_secrets(text: &str, patterns: &[&str]) -> String {
    let mut out = text.to_string();

    for pattern in patterns {
        let mut cursor = 0;
        while let Some(found) = out[cursor..].find(pattern) {
            let value_start = cursor + found + pattern.len();
            let value_end = out[value_start..]
                .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '&' | ','))
                .map_or(out.len(), |len| value_start + len);

            if value_end > value_start {
                out.replace_range(value_start..value_end, "[REDACTED]");
                cursor = value_start + "[REDACTED]".len();
            } else {
                cursor = value_start;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_secret_redaction() {
        let secret = SigningSecret::new(b"super-secret-signing-key");
        let debug = format!("{secret:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("super-secret"));
        assert_eq!(secret.expose(), b"super-secret-signing-key");
    }

    #[test]
    fn test_from_string_trims() {
        let secret = SigningSecret::from_string("  padded-secret \n".to_string());
        assert_eq!(secret.expose(), b"padded-secret");
    }

    #[test]
    fn test_generate() {
        let a = SigningSecret::generate();
        let b = SigningSecret::generate();
        assert!(a.is_strong());
        assert_ne!(a.expose(), b.expose());

        let hex_secret = SigningSecret::generate_hex();
        assert_eq!(hex_secret.len(), 64);
        assert!(hex_secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_weak_secret() {
        assert!(!SigningSecret::new(b"short").is_strong());
        assert!(SigningSecret::new(b"").is_empty());
    }

    #[test]
    fn test_scrub_bearer_and_query() {
        let text = "rejected Bearer eyJhbGciOi.payload.sig for token=abc123&x=1";
        let scrubbed = scrub_secrets(text, COMMON_SECRET_PATTERNS);
        assert_eq!(scrubbed, "rejected Bearer [REDACTED] for token=[REDACTED]&x=1");
    }

    #[test]
    fn test_scrub_json_body() {
        let text = r#"{"email":"a@x.com","password":"hunter22"}"#;
        let scrubbed = scrub_secrets(text, COMMON_SECRET_PATTERNS);
        assert!(!scrubbed.contains("hunter22"));
        assert!(scrubbed.contains("a@x.com"));
    }
}
