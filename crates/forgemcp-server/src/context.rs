//! Per-invocation context threaded through the middleware pipeline.

use forgemcp_auth::AuthInfo;
use http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ServerError, ServerResult};

/// Snapshot of the inbound HTTP request, present only on the HTTP path.
/// Its absence is how middlewares recognize the local stdio transport.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Request headers
    pub headers: HeaderMap,
    /// Resolved client IP (`"unknown"` when nothing was resolvable)
    pub client_ip: String,
}

impl RequestInfo {
    /// First value of a header, as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Per-request value passed through the pipeline.
///
/// `auth` is write-once: the auth middleware sets it and every later
/// middleware sees an immutable view. The `extensions` map is an open area
/// for user middlewares to hand values downstream.
#[derive(Debug)]
pub struct InvocationContext {
    /// Name of the tool being invoked
    pub tool_name: String,
    /// Tool arguments (validation may fill in schema defaults)
    pub args: Value,
    /// Inbound HTTP request, unset on stdio
    pub request: Option<RequestInfo>,
    /// Session established by `initialize`, unset on stdio
    pub session_id: Option<String>,
    /// Where RFC 9728 metadata for this resource lives
    pub resource_metadata_url: Option<String>,
    /// Open extension area for user middlewares
    pub extensions: HashMap<String, Value>,
    auth: Option<Arc<AuthInfo>>,
}

impl InvocationContext {
    /// Context for a tool call.
    pub fn new(tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            request: None,
            session_id: None,
            resource_metadata_url: None,
            extensions: HashMap::new(),
            auth: None,
        }
    }

    /// Attach the HTTP request snapshot.
    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach the session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Verified identity, if the auth middleware ran.
    pub fn auth(&self) -> Option<&AuthInfo> {
        self.auth.as_deref()
    }

    /// Shared handle to the verified identity.
    pub fn auth_arc(&self) -> Option<Arc<AuthInfo>> {
        self.auth.clone()
    }

    /// Set the verified identity. Write-once: a second call is a pipeline
    /// bug and fails loudly.
    pub fn set_auth(&mut self, info: AuthInfo) -> ServerResult<()> {
        if self.auth.is_some() {
            return Err(ServerError::Pipeline(
                "auth info already set for this invocation".to_string(),
            ));
        }
        self.auth = Some(Arc::new(info));
        Ok(())
    }
}
