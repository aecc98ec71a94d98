//! # Warden Gateway
//!
//! The authentication core and the HTTP/JSON-RPC gateway in front of it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and authorization.
pub mod auth;
mod middleware;
/// JSON-RPC protocol types and constants.
pub mod rpc;
mod server;

pub use auth::{
    AccountService, AuthError, AuthGateway, AuthStores, RbacEngine, TokenIssuer, User, UserStore,
};
pub use middleware::AttemptLimiter;
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use server::{Gateway, GatewayBuilder, GatewayConfig, GatewayState};

/// Start the gateway server.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: GatewayConfig) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
