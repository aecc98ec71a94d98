//! JSON-RPC protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::AuthError;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Request parameters.
    #[serde(default)]
    pub params: Value,
    /// Request ID, string or number.
    #[serde(default)]
    pub id: Option<Value>,
}

/// JSON-RPC response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Result (if success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (if failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Request ID.
    pub id: Option<Value>,
}

/// JSON-RPC error.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    /// Create a success response.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// Map an auth failure to a JSON-RPC code and the caller-safe message.
#[must_use]
pub fn auth_error(err: &AuthError) -> (i32, String) {
    let code = match err {
        AuthError::TokenMalformed(_)
        | AuthError::TokenExpired
        | AuthError::TokenRevoked
        | AuthError::AccountNotFound(_)
        | AuthError::InvalidCredentials => UNAUTHORIZED,
        AuthError::Forbidden { .. } => FORBIDDEN,
        AuthError::SingleUseTokenNotFound
        | AuthError::SingleUseTokenAlreadyUsed
        | AuthError::SingleUseTokenExpired
        | AuthError::InvalidInput(_) => INVALID_PARAMS,
        AuthError::UserExists(_) => CONFLICT,
        AuthError::RateLimited => RATE_LIMITED,
        AuthError::Storage(_) => UNAVAILABLE,
        AuthError::ConfigurationMissing(_) | AuthError::Config(_) => INTERNAL_ERROR,
    };
    (code, err.public_message())
}

// Standard JSON-RPC error codes
/// Parse error.
pub const PARSE_ERROR: i32 = -32700;
/// Invalid request.
pub const INVALID_REQUEST: i32 = -32600;
/// Method not found.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid params.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal error.
pub const INTERNAL_ERROR: i32 = -32603;

// Application-specific error codes (using -32000 to -32099 range)
/// Unauthorized (authentication required or failed).
pub const UNAUTHORIZED: i32 = -32001;
/// Forbidden (insufficient permissions).
pub const FORBIDDEN: i32 = -32002;
/// Resource not found.
pub const NOT_FOUND: i32 = -32003;
/// A store could not answer in time. Retryable.
pub const UNAVAILABLE: i32 = -32004;
/// Too many attempts.
pub const RATE_LIMITED: i32 = -32005;
/// Resource already exists.
pub const CONFLICT: i32 = -32006;
