//! JSON-RPC 2.0 envelope and MCP wire types.
//!
//! This crate is the wire-level foundation of forgemcp: the JSON-RPC
//! message types with a version-checked `jsonrpc` field, the standard and
//! server-specific error codes, and the MCP data model exchanged during
//! `initialize`, `tools/*` and `resources/*` operations.
//!
//! Nothing here performs I/O; transports in `forgemcp-server` decode into
//! and encode out of these types.

pub mod jsonrpc;
pub mod types;

pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponsePayload, JsonRpcVersion, RequestId, ResponseId, JSONRPC_VERSION,
};
pub use types::{
    CallToolParams, CallToolResult, ContentBlock, EmptyResult, InitializeResult,
    ListResourcesResult, ListToolsResult, ReadResourceParams, ReadResourceResult, Resource,
    ResourceContents, ServerCapabilities, ServerInfo, Tool,
};
