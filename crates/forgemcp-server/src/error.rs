//! Server error taxonomy.
//!
//! Middlewares and handlers fail with structured variants; the transports
//! map them to JSON-RPC error codes (and, for HTTP, status codes) with a
//! plain match. Error strings never carry token material, JWKS internals
//! or stack traces.

use forgemcp_auth::AuthError;
use forgemcp_protocol::jsonrpc::{JsonRpcError, JsonRpcErrorCode};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors produced by the core components.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Backpressure reject: the queue is at capacity
    #[error("Capacity exceeded: {limit} requests already in flight")]
    CapacityExceeded {
        /// Configured concurrency limit
        limit: usize,
    },

    /// A per-tool or per-IP rate limit fired
    #[error("{message}")]
    RateLimited {
        /// Human-readable message including the retry hint
        message: String,
        /// Time until a slot frees up
        retry_after_ms: u64,
    },

    /// Request body exceeded the configured limit
    #[error("Payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Observed (or declared) size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Structured authentication failure
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Tool arguments failed schema validation
    #[error("{message}")]
    Validation {
        /// All flattened validation errors joined with `; `
        message: String,
    },

    /// No tool registered under the requested name
    #[error("Unknown tool: {name}")]
    UnknownTool {
        /// Requested tool name
        name: String,
    },

    /// No resource registered under the requested URI
    #[error("Resource not found: {uri}")]
    ResourceNotFound {
        /// Requested URI
        uri: String,
    },

    /// A tool handler failed
    #[error("Handler error: {message}")]
    Handler {
        /// Error message from the handler
        message: String,
    },

    /// The supplied session id is unknown or expired
    #[error("Session not found or expired")]
    SessionNotFound,

    /// The session table is full and cleanup freed nothing
    #[error("Too many active sessions")]
    SessionExhaustion,

    /// Registration-time failure (duplicates, post-start inserts)
    #[error("Registry error: {0}")]
    Registry(String),

    /// Invalid configuration detected at build time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The pipeline was assembled inconsistently, e.g. a scope check with
    /// no auth middleware on an HTTP call
    #[error("Pipeline misconfiguration: {0}")]
    Pipeline(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O failure in a transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server is shutting down
    #[error("Server is shutting down")]
    Shutdown,

    /// Anything else
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The JSON-RPC error code this error surfaces as.
    pub fn json_rpc_code(&self) -> JsonRpcErrorCode {
        match self {
            Self::CapacityExceeded { .. }
            | Self::RateLimited { .. }
            | Self::PayloadTooLarge { .. }
            | Self::SessionExhaustion => JsonRpcErrorCode::ServerOverloaded,
            Self::SessionNotFound | Self::Auth(_) => JsonRpcErrorCode::SessionNotFound,
            Self::Validation { .. } | Self::UnknownTool { .. } | Self::ResourceNotFound { .. } => {
                JsonRpcErrorCode::InvalidParams
            }
            Self::Handler { .. }
            | Self::Registry(_)
            | Self::Configuration(_)
            | Self::Pipeline(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Shutdown
            | Self::Internal(_) => JsonRpcErrorCode::InternalError,
        }
    }

    /// Convert into a JSON-RPC error object.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        JsonRpcError::new(self.json_rpc_code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_taxonomy() {
        assert_eq!(
            ServerError::CapacityExceeded { limit: 4 }.json_rpc_code().code(),
            -32000
        );
        assert_eq!(
            ServerError::RateLimited {
                message: "Rate limit exceeded".into(),
                retry_after_ms: 1000
            }
            .json_rpc_code()
            .code(),
            -32000
        );
        assert_eq!(ServerError::SessionNotFound.json_rpc_code().code(), -32001);
        assert_eq!(
            ServerError::UnknownTool { name: "x".into() }.json_rpc_code().code(),
            -32602
        );
        assert_eq!(
            ServerError::Validation { message: "m".into() }.json_rpc_code().code(),
            -32602
        );
        assert_eq!(
            ServerError::handler("boom").json_rpc_code().code(),
            -32603
        );
        assert_eq!(
            ServerError::SessionExhaustion.json_rpc_code().code(),
            -32000
        );
    }

    #[test]
    fn messages_do_not_leak_internals() {
        let err = ServerError::Auth(AuthError::invalid_token(None));
        assert_eq!(err.to_string(), "Invalid or expired token");
    }
}
