//! Identity token issuing and validation.
//!
//! Tokens are HS256 JWTs carrying `{sub, iss, iat, exp, jti}`. The issuer is
//! pure: it never touches storage, so revocation is checked by the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use warden_core::{AuthConfig, SigningSecret};

use super::AuthError;

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (normalized email).
    pub sub: String,
    /// Issuer.
    pub iss: String,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Unique token identifier, used for revocation.
    pub jti: String,
}

impl Claims {
    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Creates and verifies identity tokens.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer from a signing secret.
    #[must_use]
    pub fn new(secret: &SigningSecret, issuer: impl Into<String>, ttl: Duration) -> Self {
        let issuer = issuer.into();

        // Expiry is checked against an explicit clock in `validate_at`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.expose()),
            decoding_key: DecodingKey::from_secret(secret.expose()),
            validation,
            issuer,
            ttl,
        }
    }

    /// Create an issuer from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` if no signing secret can be resolved.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let secret = config
            .signing_secret()
            .map_err(|e| AuthError::ConfigurationMissing(e.to_string()))?;

        if !secret.is_strong() {
            tracing::warn!(
                len = secret.len(),
                "Signing secret is shorter than 32 bytes"
            );
        }

        Ok(Self::new(&secret, config.issuer.clone(), config.token_ttl()))
    }

    /// Token lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for a subject.
    ///
    /// Returns the serialized token and the claims it carries.
    ///
    /// # Errors
    ///
    /// Returns error if token encoding fails.
    pub fn issue(&self, subject: &str) -> Result<(String, Claims), AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AuthError::Config(format!("Invalid token TTL: {e}")))?;

        let claims = Claims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: new_jti(),
        };

        let token = self.sign(&claims)?;
        tracing::debug!(sub = %claims.sub, jti = %claims.jti, "Issued token");

        Ok((token, claims))
    }

    /// Verify signature, structure, issuer, and expiry.
    ///
    /// # Errors
    ///
    /// Returns `TokenExpired` for a valid token past its expiry and
    /// `TokenMalformed` for anything that fails to parse or verify.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// [`validate`](Self::validate) with an explicit clock. A token is still
    /// valid in the second named by its `exp`.
    pub(crate) fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::TokenMalformed(e.to_string()))?;

        let claims = data.claims;
        if claims.sub.is_empty() || claims.jti.is_empty() {
            return Err(AuthError::TokenMalformed(
                "empty subject or token id".to_string(),
            ));
        }
        if claims.exp < now.timestamp() {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Config(format!("Token encoding failed: {e}")))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// 128 random bits, hex-encoded.
fn new_jti() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
