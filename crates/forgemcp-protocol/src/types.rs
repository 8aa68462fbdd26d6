//! MCP data model types.
//!
//! Wire representations for the initialize handshake, tool listing and
//! invocation, and resource listing and reads. Field names follow the MCP
//! convention (camelCase on the wire).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool arguments
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Opaque tool metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// One block of tool output content. Only text blocks are produced by this
/// server; pre-formatted handler results may carry other kinds through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Content kind, e.g. `"text"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload
    pub text: String,
}

impl ContentBlock {
    /// A `text` content block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Ordered content blocks
    pub content: Vec<ContentBlock>,
    /// Whether the call failed inside the tool
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Opaque result metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl CallToolResult {
    /// Wrap a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: None,
            meta: None,
        }
    }

    /// Structural check for pre-formatted results: a mapping whose `content`
    /// is a non-empty array and whose first element carries `type` and
    /// `text` fields.
    pub fn matches(value: &Value) -> bool {
        value
            .get("content")
            .and_then(Value::as_array)
            .and_then(|content| content.first())
            .is_some_and(|first| first.get("type").is_some() && first.get("text").is_some())
    }
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments; defaults to an empty object
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Registered tools
    pub tools: Vec<Tool>,
    /// Pagination cursor (unused, tools fit in one page)
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A resource as advertised by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI
    pub uri: String,
    /// Display name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the content
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Content returned by a resource read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContents {
    /// Resource URI
    pub uri: String,
    /// MIME type of the content
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text content
    pub text: String,
}

/// Parameters of `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// URI to read
    pub uri: String,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// Resource contents
    pub contents: Vec<ResourceContents>,
}

/// Result of `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    /// Registered resources
    pub resources: Vec<Resource>,
}

/// Capabilities advertised during initialization. `tools` is always
/// present; `resources` only when resources are registered or pre-declared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool capability marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    /// Resource capability marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
}

/// Server identity advertised during initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

/// Result of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Advertised protocol revision
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Advertised capabilities
    pub capabilities: ServerCapabilities,
    /// Server identity
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Empty result object, used by `ping`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyResult {}
