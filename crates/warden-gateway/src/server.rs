//! Gateway server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{FromRef, State},
    http::{Extensions, HeaderMap, HeaderValue, header::SET_COOKIE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use warden_core::Config;

use crate::GatewayError;
use crate::auth::{
    AccountService, AuthConfig, AuthError, AuthGateway, AuthStores, CookieConfig, Identity,
    LogNotifier, Notifier, Pruner, RequestAuth, RequireAuth, Session, TokenIssuer, clear_cookie,
    cookie_bridge, run_blocking, session_cookie,
};
use crate::rpc::{self, RpcRequest, RpcResponse};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub bind_address: String,
    /// Enable CORS.
    pub cors: bool,
    /// Per-request deadline. Store calls that run past it end the request.
    pub timeout: Duration,
    /// Data directory for persistent storage.
    pub data_dir: PathBuf,
    /// Authentication configuration.
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            port: config.gateway.port,
            bind_address: config.gateway.bind_address(),
            cors: config.gateway.cors,
            timeout: Duration::from_secs(config.gateway.timeout_secs.max(1)),
            data_dir: config
                .gateway
                .data_dir
                .clone()
                .unwrap_or_else(Config::data_dir),
            auth: config.auth.clone(),
        }
    }
}

/// Gateway server state shared across handlers.
#[derive(Clone, FromRef)]
pub struct GatewayState {
    /// Request-time authentication.
    pub gateway: AuthGateway,
    /// Account flows.
    pub accounts: Arc<AccountService>,
    /// Underlying stores.
    pub stores: AuthStores,
    /// Auth cookie settings.
    pub cookie: CookieConfig,
}

impl GatewayState {
    /// Wire the auth core on top of opened stores. Store work done for a
    /// request fails with `Storage` once it runs past `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` if no signing secret is available.
    pub fn new(
        stores: AuthStores,
        auth: &AuthConfig,
        notifier: Arc<dyn Notifier>,
        deadline: Duration,
    ) -> Result<Self, AuthError> {
        let issuer = TokenIssuer::from_config(auth)?;
        let gateway = AuthGateway::new(
            Arc::new(issuer),
            stores.revocations.clone(),
            stores.users.clone(),
            stores.rbac.clone(),
        )
        .with_deadline(deadline);
        let accounts = Arc::new(AccountService::new(
            gateway.clone(),
            stores.single_use.clone(),
            notifier,
            auth.clone(),
        ));

        Ok(Self {
            gateway,
            accounts,
            stores,
            cookie: auth.cookie.clone(),
        })
    }

    fn config(&self) -> &AuthConfig {
        self.accounts.config()
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("gateway", &self.gateway)
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

/// Gateway server.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    state: GatewayState,
}

/// Builder for constructing a Gateway with its dependencies.
#[derive(Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    stores: Option<AuthStores>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Use already opened stores instead of opening the data directory.
    #[must_use]
    pub fn with_stores(mut self, stores: AuthStores) -> Self {
        self.stores = Some(stores);
        self
    }

    /// Set the notifier for verification and reset messages.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if the stores cannot be opened or no signing secret is configured.
    pub fn build(mut self) -> Result<Gateway, GatewayError> {
        self.config.auth = self.config.auth.with_env_overrides();

        let stores = match self.stores {
            Some(stores) => stores,
            None => {
                std::fs::create_dir_all(&self.config.data_dir).map_err(|e| {
                    GatewayError::Config(format!("Failed to create data dir: {e}"))
                })?;
                AuthStores::open(&self.config.data_dir)
                    .map_err(|e| GatewayError::Server(format!("Failed to open stores: {e}")))?
            }
        };

        if stores.users.is_empty() {
            tracing::warn!("No accounts exist yet; create one with `warden admin create`");
        }

        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let state = GatewayState::new(stores, &self.config.auth, notifier, self.config.timeout)
            .map_err(|e| GatewayError::Config(format!("Auth init failed: {e}")))?;

        Ok(Gateway {
            config: self.config,
            state,
        })
    }
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the stores cannot be opened or no signing secret is configured.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        GatewayBuilder::new().with_config(config).build()
    }

    /// Shared state.
    #[must_use]
    pub const fn state(&self) -> &GatewayState {
        &self.state
    }

    /// The HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(self.state.clone(), &self.config)
    }

    /// Run the gateway server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the listener fails.
    pub async fn run(self) -> Result<(), GatewayError> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let pruner = self.config.auth.prune_interval().map(|interval| {
            Pruner::spawn(
                self.state.stores.revocations.clone(),
                self.state.stores.single_use.clone(),
                interval,
            )
        });

        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Gateway API listening on http://{}", addr);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::Server(e.to_string()));

        if let Some(pruner) = pruner {
            pruner.shutdown().await;
        }
        if let Err(e) = self.state.stores.flush() {
            tracing::warn!(error = %e, "Final flush failed");
        }

        served
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn build_router(state: GatewayState, config: &GatewayConfig) -> Router {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/rpc", post(rpc_handler))
        .route("/api/v1/me", get(me_handler))
        .route("/api/v1/roles", get(roles_handler))
        .layer(middleware::from_fn_with_state(
            state.cookie.clone(),
            cookie_bridge,
        ))
        .layer(TimeoutLayer::new(config.timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn me_handler(
    State(state): State<GatewayState>,
    RequireAuth(identity): RequireAuth,
) -> Result<Json<Value>, AuthError> {
    let gateway = state.gateway.clone();
    let email = identity.email().to_string();
    let roles = run_blocking(state.gateway.deadline(), move || {
        gateway.rbac().roles_for(&email)
    })
    .await?;
    Ok(Json(json!({
        "user": identity.user.to_public(),
        "roles": roles,
    })))
}

async fn roles_handler(
    State(state): State<GatewayState>,
    auth: RequireAuth,
) -> Result<Json<Value>, AuthError> {
    let gateway = state.gateway.clone();
    let roles = run_blocking(state.gateway.deadline(), move || {
        auth.require(&gateway, "rbac", "manage")?;

        let rbac = gateway.rbac();
        let mut roles = Vec::new();
        for role in rbac.list_roles()? {
            let grants: Vec<String> = rbac
                .grants_for(&role)?
                .into_iter()
                .map(|(resource, action)| format!("{resource}:{action}"))
                .collect();
            roles.push(json!({ "role": role, "grants": grants }));
        }
        Ok(roles)
    })
    .await?;
    Ok(Json(json!({ "roles": roles })))
}

async fn rpc_handler(
    State(state): State<GatewayState>,
    extensions: Extensions,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> Response {
    let id = request.id.clone();

    let auth = extensions
        .get::<Arc<RequestAuth>>()
        .cloned()
        .unwrap_or_else(|| Arc::new(RequestAuth::from_headers(&headers, &state.cookie.name)));

    let result = if request.jsonrpc == "2.0" {
        // Store calls and password hashing block; keep them off the runtime.
        let worker = state.clone();
        let method = request.method.clone();
        let params = request.params.clone();
        run_blocking(state.gateway.deadline(), move || {
            Ok(dispatch_rpc(&worker, &method, &params, &auth))
        })
        .await
        .unwrap_or_else(|e| Err(rpc::auth_error(&e)))
    } else {
        Err((rpc::INVALID_REQUEST, "jsonrpc must be \"2.0\"".to_string()))
    };

    let cookie = match (&result, request.method.as_str()) {
        (Ok(value), "auth.login" | "auth.register" | "auth.changeEmail") => value["token"]
            .as_str()
            .map(|token| session_cookie(&state.cookie, token, state.gateway.issuer().ttl())),
        (Ok(_), "auth.logout") => Some(clear_cookie(&state.cookie)),
        _ => None,
    };

    let body = Json(match result {
        Ok(value) => RpcResponse::success(id, value),
        Err((code, message)) => RpcResponse::error(id, code, message),
    });

    match cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        Some(value) => ([(SET_COOKIE, value)], body).into_response(),
        None => body.into_response(),
    }
}

type RpcResult = Result<Value, (i32, String)>;

/// Dispatch RPC request to appropriate handler.
fn dispatch_rpc(
    state: &GatewayState,
    method: &str,
    params: &Value,
    auth: &RequestAuth,
) -> RpcResult {
    let identity = if state.config().is_public_method(method) {
        None
    } else {
        Some(auth.identity(&state.gateway).map_err(|e| rpc::auth_error(&e))?)
    };

    match (method, identity) {
        // Public auth methods
        ("auth.register", _) => handle_auth_register(state, params),
        ("auth.login", _) => handle_auth_login(state, params),
        ("auth.logout", _) => handle_auth_logout(state, auth),
        ("auth.sendVerification", _) => handle_send_verification(state, params),
        ("auth.verify", _) => handle_verify(state, params),
        ("auth.forgotPassword", _) => handle_forgot_password(state, params),
        ("auth.resetPassword", _) => handle_reset_password(state, params),

        // Authenticated methods
        ("auth.me", Some(identity)) => handle_auth_me(state, identity),
        ("auth.changePassword", Some(identity)) => {
            handle_change_password(state, identity, params)
        }
        ("auth.changeEmail", Some(identity)) => handle_change_email(state, identity, params),
        ("rbac.check", Some(identity)) => handle_rbac_check(state, identity, params),
        ("rbac.assign", Some(identity)) => handle_rbac_assign(state, identity, params),

        // System methods
        ("system.health", _) => handle_system_health(state),
        ("system.version", _) => Ok(handle_system_version()),

        (
            "auth.me" | "auth.changePassword" | "auth.changeEmail" | "rbac.check"
            | "rbac.assign",
            None,
        ) => Err((rpc::UNAUTHORIZED, "unauthenticated".to_string())),
        _ => Err((rpc::METHOD_NOT_FOUND, format!("Method not found: {method}"))),
    }
}

fn param<'a>(params: &'a Value, name: &str) -> Result<&'a str, (i32, String)> {
    params[name]
        .as_str()
        .ok_or_else(|| (rpc::INVALID_PARAMS, format!("Missing {name}")))
}

fn session_json(session: &Session) -> Value {
    json!({
        "token": session.token,
        "token_type": "Bearer",
        "expires_at": session.expires_at.to_rfc3339(),
        "user": session.user,
    })
}

// ============================================================================
// Auth RPC Handlers
// ============================================================================

fn handle_auth_register(state: &GatewayState, params: &Value) -> RpcResult {
    let session = state
        .accounts
        .register(
            param(params, "email")?,
            param(params, "password")?,
            param(params, "first_name")?,
            param(params, "last_name")?,
        )
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(session_json(&session))
}

fn handle_auth_login(state: &GatewayState, params: &Value) -> RpcResult {
    let session = state
        .accounts
        .login(param(params, "email")?, param(params, "password")?)
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(session_json(&session))
}

fn handle_auth_logout(state: &GatewayState, auth: &RequestAuth) -> RpcResult {
    let revoked = state
        .accounts
        .logout(auth.token())
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(json!({ "revoked": revoked }))
}

fn handle_auth_me(state: &GatewayState, identity: &Identity) -> RpcResult {
    let roles = state
        .gateway
        .rbac()
        .roles_for(identity.email())
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(json!({
        "user": identity.user.to_public(),
        "roles": roles,
    }))
}

fn handle_send_verification(state: &GatewayState, params: &Value) -> RpcResult {
    state
        .accounts
        .send_verification(param(params, "email")?)
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(json!({ "sent": true }))
}

fn handle_verify(state: &GatewayState, params: &Value) -> RpcResult {
    let user = state
        .accounts
        .verify_email(param(params, "token")?)
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(json!({ "email": user.email, "verified": true }))
}

fn handle_forgot_password(state: &GatewayState, params: &Value) -> RpcResult {
    state
        .accounts
        .forgot_password(param(params, "email")?)
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(json!({ "ok": true }))
}

fn handle_reset_password(state: &GatewayState, params: &Value) -> RpcResult {
    state
        .accounts
        .reset_password(param(params, "token")?, param(params, "new_password")?)
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(json!({ "reset": true }))
}

fn handle_change_password(state: &GatewayState, identity: &Identity, params: &Value) -> RpcResult {
    state
        .accounts
        .change_password(
            identity,
            param(params, "current_password")?,
            param(params, "new_password")?,
        )
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(json!({ "changed": true }))
}

fn handle_change_email(state: &GatewayState, identity: &Identity, params: &Value) -> RpcResult {
    let password = params["password"].as_str().unwrap_or_default();
    let session = state
        .accounts
        .change_email(identity, password, param(params, "new_email")?)
        .map_err(|e| rpc::auth_error(&e))?;
    Ok(session_json(&session))
}

// ============================================================================
// RBAC RPC Handlers
// ============================================================================

fn handle_rbac_check(state: &GatewayState, identity: &Identity, params: &Value) -> RpcResult {
    let resource = param(params, "resource")?;
    let action = param(params, "action")?;

    let allowed = match state.gateway.authorize(identity, resource, action) {
        Ok(()) => true,
        Err(AuthError::Forbidden { .. }) => false,
        Err(e) => return Err(rpc::auth_error(&e)),
    };
    Ok(json!({ "allowed": allowed }))
}

fn handle_rbac_assign(state: &GatewayState, identity: &Identity, params: &Value) -> RpcResult {
    state
        .gateway
        .authorize(identity, "rbac", "manage")
        .map_err(|e| rpc::auth_error(&e))?;

    let email = warden_core::validate_email(param(params, "email")?)
        .map_err(|e| rpc::auth_error(&AuthError::from(e)))?;
    let role = param(params, "role")?;

    state
        .gateway
        .rbac()
        .assign_role(&email, role)
        .map_err(|e| rpc::auth_error(&e))?;
    tracing::info!(by = %identity.email(), email = %email, role = %role, "Role assigned over RPC");

    Ok(json!({ "assigned": true }))
}

// ============================================================================
// System RPC Handlers
// ============================================================================

fn handle_system_health(state: &GatewayState) -> RpcResult {
    Ok(json!({
        "status": "healthy",
        "users_configured": !state.stores.users.is_empty(),
        "revoked_tokens": state.stores.revocations.len(),
    }))
}

fn handle_system_version() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "warden-gateway",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{User, UserRepository};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::AUTHORIZATION};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_gateway() -> (TempDir, Gateway) {
        let dir = TempDir::new().unwrap();
        let config = GatewayConfig {
            data_dir: dir.path().to_path_buf(),
            auth: AuthConfig::builder()
                .jwt_secret("server-test-secret-server-test-secret")
                .build(),
            ..GatewayConfig::default()
        };
        let stores = AuthStores::open(dir.path()).unwrap();
        let gateway = GatewayBuilder::new()
            .with_config(config)
            .with_stores(stores)
            .build()
            .unwrap();
        (dir, gateway)
    }

    async fn call(
        gateway: &Gateway,
        method: &str,
        params: Value,
        token: Option<&str>,
    ) -> (Option<String>, Value) {
        let mut request = Request::post("/rpc").header("content-type", "application/json");
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 });
        let response = gateway
            .router()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();

        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (cookie, serde_json::from_slice(&bytes).unwrap())
    }

    async fn register(gateway: &Gateway, email: &str) -> String {
        let (_, body) = call(
            gateway,
            "auth.register",
            json!({
                "email": email,
                "password": "password123",
                "first_name": "Ada",
                "last_name": "Lovelace",
            }),
            None,
        )
        .await;
        body["result"]["token"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 18790);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_build_requires_secret() {
        let dir = TempDir::new().unwrap();
        let config = GatewayConfig {
            data_dir: dir.path().to_path_buf(),
            ..GatewayConfig::default()
        };
        let stores = AuthStores::open(dir.path()).unwrap();
        let result = GatewayBuilder::new()
            .with_config(config)
            .with_stores(stores)
            .build();

        // WARDEN_JWT_SECRET may be set in the environment running the tests.
        if std::env::var("WARDEN_JWT_SECRET").is_err() {
            assert!(matches!(result, Err(GatewayError::Config(_))));
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, gateway) = test_gateway();
        let response = gateway
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_login_me() {
        let (_dir, gateway) = test_gateway();
        register(&gateway, "a@x.com").await;

        let (cookie, body) = call(
            &gateway,
            "auth.login",
            json!({ "email": "a@x.com", "password": "password123" }),
            None,
        )
        .await;
        let token = body["result"]["token"].as_str().unwrap();
        let cookie = cookie.unwrap();
        assert!(cookie.starts_with("warden_auth="));
        assert!(cookie.contains("HttpOnly"));

        let (_, me) = call(&gateway, "auth.me", json!({}), Some(token)).await;
        assert_eq!(me["result"]["user"]["email"], "a@x.com");
        assert_eq!(me["id"], 1);
    }

    #[tokio::test]
    async fn test_protected_method_requires_token() {
        let (_dir, gateway) = test_gateway();
        let (_, body) = call(&gateway, "auth.me", json!({}), None).await;
        assert_eq!(body["error"]["code"], rpc::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "unauthenticated");

        let (_, body) = call(&gateway, "auth.me", json!({}), Some("forged")).await;
        assert_eq!(body["error"]["message"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_logout_revokes_and_clears_cookie() {
        let (_dir, gateway) = test_gateway();
        let token = register(&gateway, "a@x.com").await;

        let (cookie, body) = call(&gateway, "auth.logout", json!({}), Some(&token)).await;
        assert_eq!(body["result"]["revoked"], true);
        assert!(cookie.unwrap().contains("Max-Age=0"));

        let (_, body) = call(&gateway, "auth.me", json!({}), Some(&token)).await;
        assert_eq!(body["error"]["message"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_rbac_assign_requires_manage() {
        let (_dir, gateway) = test_gateway();
        let user_token = register(&gateway, "a@x.com").await;
        let admin_token = register(&gateway, "root@x.com").await;

        let users = &gateway.state().stores.users;
        users
            .update("root@x.com", &mut |u| u.is_superuser = true)
            .unwrap();

        let params = json!({ "email": "a@x.com", "role": "Reader" });
        let (_, denied) = call(&gateway, "rbac.assign", params.clone(), Some(&user_token)).await;
        assert_eq!(denied["error"]["code"], rpc::FORBIDDEN);

        let (_, ok) = call(&gateway, "rbac.assign", params, Some(&admin_token)).await;
        assert_eq!(ok["result"]["assigned"], true);

        gateway
            .state()
            .stores
            .rbac
            .grant("Reader", "items", "read")
            .unwrap();
        let (_, check) = call(
            &gateway,
            "rbac.check",
            json!({ "resource": "items", "action": "read" }),
            Some(&user_token),
        )
        .await;
        assert_eq!(check["result"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_me_route_with_cookie() {
        let (_dir, gateway) = test_gateway();
        let token = register(&gateway, "a@x.com").await;

        let response = gateway
            .router()
            .oneshot(
                Request::get("/api/v1/me")
                    .header("cookie", format!("warden_auth={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = gateway
            .router()
            .oneshot(Request::get("/api/v1/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_roles_route_requires_manage() {
        let (_dir, gateway) = test_gateway();
        let token = register(&gateway, "a@x.com").await;
        let get_roles = |token: &str| {
            Request::get("/api/v1/roles")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };

        let response = gateway.router().oneshot(get_roles(&token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let rbac = &gateway.state().stores.rbac;
        rbac.grant("Admin", "rbac", "manage").unwrap();
        rbac.assign_role("a@x.com", "Admin").unwrap();

        let response = gateway.router().oneshot(get_roles(&token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["roles"][0]["grants"][0], "rbac:manage");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_dir, gateway) = test_gateway();
        let token = register(&gateway, "a@x.com").await;
        let (_, body) = call(&gateway, "nope.nothing", json!({}), Some(&token)).await;
        assert_eq!(body["error"]["code"], rpc::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_public_methods() {
        let (_dir, gateway) = test_gateway();
        gateway
            .state()
            .stores
            .users
            .insert(&User::new("a@x.com", "password123", "A", "B").unwrap())
            .unwrap();

        let (_, body) = call(&gateway, "system.version", json!({}), None).await;
        assert_eq!(body["result"]["name"], "warden-gateway");

        let (_, body) = call(
            &gateway,
            "auth.forgotPassword",
            json!({ "email": "ghost@x.com" }),
            None,
        )
        .await;
        assert_eq!(body["result"]["ok"], true);
    }

    /// Answers every lookup, but only after `delay`.
    struct SlowUsers {
        inner: crate::auth::UserStore,
        delay: Duration,
    }

    impl UserRepository for SlowUsers {
        fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
            std::thread::sleep(self.delay);
            self.inner.get_by_email(email)
        }

        fn insert(&self, user: &User) -> Result<(), AuthError> {
            self.inner.insert(user)
        }

        fn update(
            &self,
            email: &str,
            change: &mut dyn FnMut(&mut User),
        ) -> Result<User, AuthError> {
            self.inner.update(email, change)
        }

        fn rename(&self, old_email: &str, new_email: &str) -> Result<User, AuthError> {
            self.inner.rename(old_email, new_email)
        }
    }

    #[tokio::test]
    async fn test_slow_store_is_unavailable_not_unauthenticated() {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let stores = AuthStores::with_db(db.clone()).unwrap();
        let users = crate::auth::UserStore::with_db(&db).unwrap();
        users
            .insert(&User::new("a@x.com", "password123", "A", "B").unwrap())
            .unwrap();
        let auth = AuthConfig::builder()
            .jwt_secret("server-test-secret-server-test-secret")
            .build();

        let gateway = AuthGateway::new(
            Arc::new(TokenIssuer::from_config(&auth).unwrap()),
            stores.revocations.clone(),
            Arc::new(SlowUsers {
                inner: users,
                delay: Duration::from_millis(500),
            }),
            stores.rbac.clone(),
        )
        .with_deadline(Duration::from_millis(50));
        let (token, _) = gateway.issuer().issue("a@x.com").unwrap();
        let state = GatewayState {
            accounts: Arc::new(AccountService::new(
                gateway.clone(),
                stores.single_use.clone(),
                Arc::new(LogNotifier),
                auth.clone(),
            )),
            gateway,
            stores,
            cookie: auth.cookie.clone(),
        };
        let router = build_router(state, &GatewayConfig::default());

        let body = json!({ "jsonrpc": "2.0", "method": "auth.me", "params": {}, "id": 1 });
        let response = router
            .clone()
            .oneshot(
                Request::post("/rpc")
                    .header("content-type", "application/json")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], rpc::UNAVAILABLE);

        let response = router
            .oneshot(
                Request::get("/api/v1/me")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
