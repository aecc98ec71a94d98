//! Request-time authentication and authorization.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::http::{
    HeaderMap,
    header::{AUTHORIZATION, COOKIE},
};

use super::AuthError;
use super::jwt::{Claims, TokenIssuer};
use super::rbac::RbacEngine;
use super::revocation::RevocationStore;
use super::users::{User, UserRepository};

/// How long request-time store work may run before the caller gets `Storage`.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The resolved account.
    pub user: User,
    /// Claims of the presented token.
    pub claims: Claims,
}

impl Identity {
    /// Normalized email of the caller.
    #[must_use]
    pub fn email(&self) -> &str {
        &self.user.email
    }
}

/// Orchestrates token validation, revocation, user lookup and permission checks.
///
/// This is the only entry point request handlers should use.
#[derive(Clone)]
pub struct AuthGateway {
    issuer: Arc<TokenIssuer>,
    revocations: Arc<RevocationStore>,
    users: Arc<dyn UserRepository>,
    rbac: Arc<RbacEngine>,
    deadline: Duration,
}

impl AuthGateway {
    /// Wire a gateway from its collaborators.
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        revocations: Arc<RevocationStore>,
        users: Arc<dyn UserRepository>,
        rbac: Arc<RbacEngine>,
    ) -> Self {
        Self {
            issuer,
            revocations,
            users,
            rbac,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Bound request-time store work by `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Deadline for store work done on behalf of a request.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Resolve a presented token to an identity.
    ///
    /// Order: signature and expiry, then the deny-list, then the account.
    ///
    /// # Errors
    ///
    /// Returns one of the authentication failures, or `Storage` if a store
    /// could not answer.
    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let result = self.resolve(token);
        if let Err(err) = &result {
            if err.is_authentication_failure() {
                tracing::debug!(reason = %err, "Authentication rejected");
            } else {
                tracing::warn!(error = %err, "Authentication could not complete");
            }
        }
        result
    }

    fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.issuer.validate(token)?;

        if self.revocations.is_revoked(&claims.jti)? {
            return Err(AuthError::TokenRevoked);
        }

        let user = self
            .users
            .get_by_email(&claims.sub)?
            .ok_or_else(|| AuthError::AccountNotFound(claims.sub.clone()))?;

        Ok(Identity { user, claims })
    }

    /// Check a permission for an authenticated caller.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` when denied, or `Storage`.
    pub fn authorize(
        &self,
        identity: &Identity,
        resource: &str,
        action: &str,
    ) -> Result<(), AuthError> {
        self.rbac
            .require_permission(identity.email(), resource, action)
    }

    /// Put an identity's token on the deny-list until it would expire anyway.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn revoke(&self, claims: &Claims) -> Result<(), AuthError> {
        self.revocations.revoke(&claims.jti, claims.expires_at())
    }

    /// Token issuer.
    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// RBAC engine.
    #[must_use]
    pub fn rbac(&self) -> &RbacEngine {
        &self.rbac
    }

    /// User repository.
    #[must_use]
    pub fn users(&self) -> &dyn UserRepository {
        self.users.as_ref()
    }
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("issuer", &self.issuer)
            .field("revocations", &self.revocations)
            .field("rbac", &self.rbac)
            .finish_non_exhaustive()
    }
}

/// Per-request authentication state.
///
/// The token is extracted once when the request arrives; the first call to
/// [`identity`](Self::identity) resolves it and later calls reuse the result.
/// Storage failures are not cached so a retry within the request can succeed.
#[derive(Debug, Default)]
pub struct RequestAuth {
    token: Option<String>,
    resolved: OnceLock<Result<Identity, AuthError>>,
}

impl RequestAuth {
    /// State for an already-extracted token.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            resolved: OnceLock::new(),
        }
    }

    /// Extract the token from request headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, cookie_name: &str) -> Self {
        Self::new(extract_token(headers, cookie_name))
    }

    /// The presented token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Authenticate the presented token, at most once per request.
    ///
    /// # Errors
    ///
    /// Returns `TokenMalformed` when no token was presented, otherwise
    /// whatever [`AuthGateway::authenticate`] returned.
    pub fn identity(&self, gateway: &AuthGateway) -> Result<&Identity, AuthError> {
        if let Some(resolved) = self.resolved.get() {
            return resolved.as_ref().map_err(Clone::clone);
        }

        let result = match self.token.as_deref() {
            Some(token) => gateway.authenticate(token),
            None => Err(AuthError::TokenMalformed("no token presented".to_string())),
        };

        if let Err(err) = &result {
            if err.is_retryable() {
                return Err(err.clone());
            }
        }

        self.resolved
            .get_or_init(|| result)
            .as_ref()
            .map_err(Clone::clone)
    }

    /// [`identity`](Self::identity) from async code. The lookup runs on the
    /// blocking pool and fails with `Storage` past the gateway's deadline.
    ///
    /// # Errors
    ///
    /// Same as [`identity`](Self::identity).
    pub async fn resolve(self: Arc<Self>, gateway: &AuthGateway) -> Result<Identity, AuthError> {
        if let Some(resolved) = self.resolved.get() {
            return resolved.clone();
        }

        let gateway = gateway.clone();
        run_blocking(gateway.deadline(), move || self.identity(&gateway).cloned()).await
    }
}

/// Run synchronous store or hashing work on the blocking pool.
///
/// Past `deadline` the caller gets `Storage` while the work finishes in the
/// background.
pub(crate) async fn run_blocking<T, F>(deadline: Duration, work: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(AuthError::Storage(format!("Store task failed: {e}"))),
        Err(_) => {
            tracing::warn!(?deadline, "Store work timed out");
            Err(AuthError::Storage("store did not answer in time".to_string()))
        }
    }
}

/// Parse an `Authorization` header value of the form `Bearer <token>`.
#[must_use]
pub fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Find the presented token.
///
/// A present `Authorization` header is authoritative: a non-bearer or
/// unreadable value yields no token instead of falling back to the cookie.
#[must_use]
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        return value
            .to_str()
            .ok()
            .and_then(extract_bearer)
            .map(ToString::to_string);
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::UserStore;
    use axum::http::HeaderValue;
    use std::time::Duration;
    use tempfile::TempDir;
    use warden_core::SigningSecret;

    struct Fixture {
        _dir: TempDir,
        gateway: AuthGateway,
        users: Arc<UserStore>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let users = Arc::new(UserStore::with_db(&db).unwrap());
        let rbac = Arc::new(RbacEngine::with_db(&db, users.clone()).unwrap());
        let issuer = Arc::new(TokenIssuer::new(
            &SigningSecret::generate(),
            "warden",
            Duration::from_secs(3600),
        ));
        let revocations = Arc::new(RevocationStore::with_db(&db).unwrap());

        users
            .insert(&User::new("a@x.com", "password123", "Ada", "Lovelace").unwrap())
            .unwrap();

        Fixture {
            _dir: dir,
            gateway: AuthGateway::new(issuer, revocations, users.clone(), rbac),
            users,
        }
    }

    #[test]
    fn test_authenticate() {
        let fx = fixture();
        let (token, claims) = fx.gateway.issuer().issue("a@x.com").unwrap();

        let identity = fx.gateway.authenticate(&token).unwrap();
        assert_eq!(identity.email(), "a@x.com");
        assert_eq!(identity.claims.jti, claims.jti);
    }

    #[test]
    fn test_revoked_token_rejected() {
        let fx = fixture();
        let (token, claims) = fx.gateway.issuer().issue("a@x.com").unwrap();

        // Still cryptographically valid.
        assert!(fx.gateway.issuer().validate(&token).is_ok());

        fx.gateway.revoke(&claims).unwrap();
        assert_eq!(
            fx.gateway.authenticate(&token).unwrap_err(),
            AuthError::TokenRevoked
        );
    }

    #[test]
    fn test_unknown_subject() {
        let fx = fixture();
        let (token, _) = fx.gateway.issuer().issue("ghost@x.com").unwrap();
        assert!(matches!(
            fx.gateway.authenticate(&token),
            Err(AuthError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_authorize() {
        let fx = fixture();
        let (token, _) = fx.gateway.issuer().issue("a@x.com").unwrap();
        let identity = fx.gateway.authenticate(&token).unwrap();

        assert!(matches!(
            fx.gateway.authorize(&identity, "items", "read"),
            Err(AuthError::Forbidden { .. })
        ));

        fx.gateway.rbac().assign_role("a@x.com", "Reader").unwrap();
        fx.gateway.rbac().grant("Reader", "items", "read").unwrap();
        assert!(fx.gateway.authorize(&identity, "items", "read").is_ok());
    }

    #[test]
    fn test_request_auth_caches_identity() {
        let fx = fixture();
        let (token, claims) = fx.gateway.issuer().issue("a@x.com").unwrap();
        let request = RequestAuth::new(Some(token));

        assert!(request.identity(&fx.gateway).is_ok());

        // Revocation after resolution does not affect the in-flight request.
        fx.gateway.revoke(&claims).unwrap();
        let identity = request.identity(&fx.gateway).unwrap();
        assert_eq!(identity.email(), "a@x.com");

        let fresh = RequestAuth::new(request.token().map(ToString::to_string));
        assert_eq!(
            fresh.identity(&fx.gateway).unwrap_err(),
            AuthError::TokenRevoked
        );
    }

    #[test]
    fn test_request_auth_caches_rejection() {
        let fx = fixture();
        let (token, _) = fx.gateway.issuer().issue("b@x.com").unwrap();
        let request = RequestAuth::new(Some(token));

        assert!(request.identity(&fx.gateway).is_err());
        fx.users
            .insert(&User::new("b@x.com", "password123", "B", "X").unwrap())
            .unwrap();
        assert!(matches!(
            request.identity(&fx.gateway),
            Err(AuthError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_request_without_token() {
        let fx = fixture();
        let request = RequestAuth::default();
        let err = request.identity(&fx.gateway).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(extract_bearer("bearer abc"), Some("abc"));
        assert_eq!(extract_bearer("Basic abc"), None);
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("abc"), None);
    }

    #[test]
    fn test_extract_token_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; warden_auth=from-cookie"),
        );
        assert_eq!(
            extract_token(&headers, "warden_auth").as_deref(),
            Some("from-cookie")
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            extract_token(&headers, "warden_auth").as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_non_bearer_header_does_not_fall_back_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("warden_auth=from-cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_token(&headers, "warden_auth"), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token(&headers, "warden_auth"), None);
    }

    #[test]
    fn test_extract_token_ignores_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("warden_auth_x=nope; warden_auth="));
        assert_eq!(extract_token(&headers, "warden_auth"), None);
    }
}
