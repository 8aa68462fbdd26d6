//! JSON-RPC 2.0 message types.
//!
//! Implements the subset of JSON-RPC 2.0 the MCP dialect uses: requests,
//! responses with mutually exclusive `result`/`error`, notifications, and
//! the error-code space including the server-specific `-32000`/`-32001`
//! codes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// JSON-RPC version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// Zero-sized marker that serializes as `"2.0"` and rejects anything else
/// on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "Invalid JSON-RPC version: expected '{JSONRPC_VERSION}', got '{version}'"
            )))
        }
    }
}

/// Request identifier: a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// JSON-RPC request message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`
    pub jsonrpc: JsonRpcVersion,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request identifier
    pub id: RequestId,
}

impl JsonRpcRequest {
    /// Create a new request.
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC notification message (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version, always `"2.0"`
    pub jsonrpc: JsonRpcVersion,
    /// Method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Create a new notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }
}

/// Response payload: exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcResponsePayload {
    /// Successful response
    Success {
        /// Response result
        result: Value,
    },
    /// Error response
    Error {
        /// Response error
        error: JsonRpcError,
    },
}

/// Response identifier; `null` only for parse errors, where the request id
/// could not be recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(pub Option<RequestId>);

impl ResponseId {
    /// Response id echoing a request id.
    pub fn from_request(id: RequestId) -> Self {
        Self(Some(id))
    }

    /// Null id for parse errors.
    pub fn null() -> Self {
        Self(None)
    }
}

/// JSON-RPC response message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`
    pub jsonrpc: JsonRpcVersion,
    /// Result or error, never both
    #[serde(flatten)]
    pub payload: JsonRpcResponsePayload,
    /// Request identifier being answered
    pub id: ResponseId,
}

impl JsonRpcResponse {
    /// Successful response for a request id.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Success { result },
            id: ResponseId::from_request(id),
        }
    }

    /// Error response for a request id (or `None` for parse errors).
    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcResponsePayload::Error { error },
            id: ResponseId(id),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error object with no data.
    pub fn new(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

/// Error codes used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    /// Parse error (-32700)
    ParseError,
    /// Invalid request (-32600)
    InvalidRequest,
    /// Method not found (-32601)
    MethodNotFound,
    /// Invalid params / unknown tool / resource not found (-32602)
    InvalidParams,
    /// Internal error (-32603)
    InternalError,
    /// Rate limit, capacity, session exhaustion, payload too large (-32000)
    ServerOverloaded,
    /// Session not found / unauthorized envelope (-32001)
    SessionNotFound,
    /// Any other application-defined code
    ApplicationError(i32),
}

impl JsonRpcErrorCode {
    /// Numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerOverloaded => -32000,
            Self::SessionNotFound => -32001,
            Self::ApplicationError(code) => *code,
        }
    }

    /// Standard message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerOverloaded => "Server error",
            Self::SessionNotFound => "Session not found",
            Self::ApplicationError(_) => "Application error",
        }
    }
}

impl From<i32> for JsonRpcErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32000 => Self::ServerOverloaded,
            -32001 => Self::SessionNotFound,
            other => Self::ApplicationError(other),
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_round_trips() {
        let v: JsonRpcVersion = serde_json::from_value(json!("2.0")).unwrap();
        assert_eq!(serde_json::to_value(v).unwrap(), json!("2.0"));
    }

    #[test]
    fn version_rejects_other_strings() {
        assert!(serde_json::from_value::<JsonRpcVersion>(json!("1.0")).is_err());
        assert!(serde_json::from_value::<JsonRpcVersion>(json!(2.0)).is_err());
    }

    #[test]
    fn request_round_trips_with_string_and_number_ids() {
        let req = JsonRpcRequest::new("tools/call", Some(json!({"name": "echo"})), 7.into());
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);

        let back: JsonRpcRequest =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "ping", "id": "abc"}))
                .unwrap();
        assert_eq!(back.id, RequestId::String("abc".into()));
        assert!(back.params.is_none());
    }

    #[test]
    fn response_payload_is_mutually_exclusive() {
        let ok = JsonRpcResponse::success(1.into(), json!({"ok": true}));
        let v = serde_json::to_value(&ok).unwrap();
        assert!(v.get("result").is_some());
        assert!(v.get("error").is_none());

        let err = JsonRpcResponse::error(
            Some(1.into()),
            JsonRpcError::new(JsonRpcErrorCode::InvalidParams, "bad args"),
        );
        let v = serde_json::to_value(&err).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], -32602);
    }

    #[test]
    fn parse_error_response_has_null_id() {
        let resp = JsonRpcResponse::error(
            None,
            JsonRpcError::new(JsonRpcErrorCode::ParseError, "bad json"),
        );
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["id"], Value::Null);
    }

    #[test]
    fn error_codes_map_both_ways() {
        for (code, n) in [
            (JsonRpcErrorCode::ParseError, -32700),
            (JsonRpcErrorCode::InvalidRequest, -32600),
            (JsonRpcErrorCode::MethodNotFound, -32601),
            (JsonRpcErrorCode::InvalidParams, -32602),
            (JsonRpcErrorCode::InternalError, -32603),
            (JsonRpcErrorCode::ServerOverloaded, -32000),
            (JsonRpcErrorCode::SessionNotFound, -32001),
        ] {
            assert_eq!(code.code(), n);
            assert_eq!(JsonRpcErrorCode::from(n), code);
        }
        assert_eq!(
            JsonRpcErrorCode::from(-32099),
            JsonRpcErrorCode::ApplicationError(-32099)
        );
    }
}
