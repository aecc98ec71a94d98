//! Authentication middleware for axum.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use warden_core::config::CookieConfig;
use warden_core::scrub_secrets;
use warden_core::secrets::COMMON_SECRET_PATTERNS;

use super::AuthError;
use super::gateway::{AuthGateway, Identity, RequestAuth, extract_bearer, extract_token};

/// Copy the auth cookie into `Authorization: Bearer` when the header is absent.
/// A request that sends any `Authorization` header is judged on that header alone.
///
/// Also stashes the per-request [`RequestAuth`] so every extractor in the
/// request shares one resolution.
pub async fn cookie_bridge(
    State(cookie): State<CookieConfig>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = extract_token(request.headers(), &cookie.name);

    if !request.headers().contains_key(AUTHORIZATION) {
        if let Some(value) = token
            .as_deref()
            .and_then(|t| HeaderValue::from_str(&format!("Bearer {t}")).ok())
        {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
    }

    request
        .extensions_mut()
        .insert(Arc::new(RequestAuth::new(token)));

    next.run(request).await
}

/// `Set-Cookie` value carrying a freshly issued token.
#[must_use]
pub fn session_cookie(cookie: &CookieConfig, token: &str, max_age: Duration) -> String {
    format_cookie(cookie, token, max_age.as_secs())
}

/// `Set-Cookie` value that removes the auth cookie.
#[must_use]
pub fn clear_cookie(cookie: &CookieConfig) -> String {
    format_cookie(cookie, "", 0)
}

fn format_cookie(cookie: &CookieConfig, value: &str, max_age: u64) -> String {
    let mut out = format!(
        "{}={value}; Path={}; Max-Age={max_age}; HttpOnly; SameSite={}",
        cookie.name,
        cookie.path,
        cookie.same_site.as_str()
    );
    if cookie.secure {
        out.push_str("; Secure");
    }
    out
}

/// Extractor for authenticated requests.
///
/// Use this in handler parameters to require authentication.
#[derive(Debug, Clone)]
pub struct RequireAuth(pub Identity);

impl RequireAuth {
    /// Email of the caller.
    #[must_use]
    pub fn email(&self) -> &str {
        self.0.email()
    }

    /// Fail with `Forbidden` unless the caller may perform `action` on `resource`.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden` or `Storage`.
    pub fn require(
        &self,
        gateway: &AuthGateway,
        resource: &str,
        action: &str,
    ) -> Result<(), AuthError> {
        gateway.authorize(&self.0, resource, action)
    }
}

/// Error response for auth failures.
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
    code: &'static str,
}

impl AuthError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::TokenMalformed(_)
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::AccountNotFound(_)
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::SingleUseTokenNotFound
            | Self::SingleUseTokenAlreadyUsed
            | Self::SingleUseTokenExpired
            | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::UserExists(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ConfigurationMissing(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let detail = scrub_secrets(&self.to_string(), COMMON_SECRET_PATTERNS);
        if self.status().is_server_error() {
            tracing::warn!(error = %detail, "Request failed");
        } else {
            tracing::debug!(error = %detail, "Request rejected");
        }

        let body = AuthErrorResponse {
            error: self.public_message(),
            code: self.code(),
        };

        (self.status(), Json(body)).into_response()
    }
}

/// The request's shared auth state, created on first use when the bridge
/// middleware is not installed.
fn request_auth(parts: &mut Parts) -> Arc<RequestAuth> {
    if let Some(existing) = parts.extensions.get::<Arc<RequestAuth>>() {
        return existing.clone();
    }

    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(ToString::to_string);
    let created = Arc::new(RequestAuth::new(token));
    parts.extensions.insert(created.clone());
    created
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
    AuthGateway: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gateway = AuthGateway::from_ref(state);
        let auth = request_auth(parts);

        auth.resolve(&gateway)
            .await
            .map(Self)
            .map_err(IntoResponse::into_response)
    }
}

/// Extractor for optional authentication.
///
/// Authentication failures yield `None`; storage failures still reject with 503.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<Identity>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
    AuthGateway: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gateway = AuthGateway::from_ref(state);
        let auth = request_auth(parts);

        if auth.token().is_none() {
            return Ok(Self(None));
        }

        match auth.resolve(&gateway).await {
            Ok(identity) => Ok(Self(Some(identity))),
            Err(err) if err.is_retryable() => Err(err.into_response()),
            Err(_) => Ok(Self(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenIssuer;
    use crate::auth::rbac::RbacEngine;
    use crate::auth::revocation::RevocationStore;
    use crate::auth::users::{User, UserRepository, UserStore};
    use axum::http::Request;
    use axum::{Router, body::Body, middleware, routing::get};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use warden_core::SigningSecret;
    use warden_core::config::SameSite;

    fn gateway() -> (TempDir, AuthGateway) {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let users = Arc::new(UserStore::with_db(&db).unwrap());
        users
            .insert(&User::new("a@x.com", "password123", "Ada", "Lovelace").unwrap())
            .unwrap();
        let rbac = Arc::new(RbacEngine::with_db(&db, users.clone()).unwrap());
        let gateway = AuthGateway::new(
            Arc::new(TokenIssuer::new(
                &SigningSecret::generate(),
                "warden",
                Duration::from_secs(3600),
            )),
            Arc::new(RevocationStore::with_db(&db).unwrap()),
            users,
            rbac,
        );
        (dir, gateway)
    }

    fn app(gateway: AuthGateway) -> Router {
        Router::new()
            .route(
                "/me",
                get(|RequireAuth(identity): RequireAuth| async move { identity.user.email }),
            )
            .route(
                "/maybe",
                get(|OptionalAuth(identity): OptionalAuth| async move {
                    identity.map_or_else(|| "anonymous".to_string(), |i| i.user.email)
                }),
            )
            .layer(middleware::from_fn_with_state(
                CookieConfig::default(),
                cookie_bridge,
            ))
            .with_state(gateway)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_bearer_header() {
        let (_dir, gateway) = gateway();
        let (token, _) = gateway.issuer().issue("a@x.com").unwrap();

        let response = app(gateway)
            .oneshot(
                Request::get("/me")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "a@x.com");
    }

    #[tokio::test]
    async fn test_cookie_bridge() {
        let (_dir, gateway) = gateway();
        let (token, _) = gateway.issuer().issue("a@x.com").unwrap();

        let response = app(gateway)
            .oneshot(
                Request::get("/me")
                    .header("cookie", format!("warden_auth={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_basic_header_with_cookie_is_unauthenticated() {
        let (_dir, gateway) = gateway();
        let (token, _) = gateway.issuer().issue("a@x.com").unwrap();

        let response = app(gateway)
            .oneshot(
                Request::get("/me")
                    .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
                    .header("cookie", format!("warden_auth={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(response).await.contains("unauthenticated"));
    }

    #[tokio::test]
    async fn test_rejections_are_indistinguishable() {
        let (_dir, gateway) = gateway();
        let (valid, claims) = gateway.issuer().issue("a@x.com").unwrap();
        let (orphan, _) = gateway.issuer().issue("ghost@x.com").unwrap();
        gateway.revoke(&claims).unwrap();

        let mut bodies = Vec::new();
        for token in [valid.as_str(), orphan.as_str(), "garbage"] {
            let response = app(gateway.clone())
                .oneshot(
                    Request::get("/me")
                        .header(AUTHORIZATION, format!("Bearer {token}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            bodies.push(body_string(response).await);
        }

        assert!(bodies.windows(2).all(|w| w[0] == w[1]));
        assert!(bodies[0].contains("unauthenticated"));
    }

    #[tokio::test]
    async fn test_optional_auth() {
        let (_dir, gateway) = gateway();

        let response = app(gateway)
            .oneshot(
                Request::get("/maybe")
                    .header(AUTHORIZATION, "Bearer garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "anonymous");
    }

    #[test]
    fn test_error_status() {
        assert_eq!(AuthError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Storage("timeout".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AuthError::SingleUseTokenAlreadyUsed.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_cookie_strings() {
        let cookie = CookieConfig::default();
        let set = session_cookie(&cookie, "abc", Duration::from_secs(60));
        assert_eq!(
            set,
            "warden_auth=abc; Path=/; Max-Age=60; HttpOnly; SameSite=Lax; Secure"
        );

        let insecure = CookieConfig {
            secure: false,
            same_site: SameSite::Strict,
            ..CookieConfig::default()
        };
        assert_eq!(
            clear_cookie(&insecure),
            "warden_auth=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict"
        );
    }
}
