//! Tool and resource registries.
//!
//! Tools are keyed by name, resources by URI, each behind a single lock so
//! `tools/list` always sees a consistent snapshot. Batch registration is
//! atomic: every precondition is checked before anything is inserted, and
//! a partial failure leaves the registry untouched.

use async_trait::async_trait;
use forgemcp_protocol::types::{CallToolResult, Resource, ResourceContents, Tool};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::context::InvocationContext;
use crate::error::{ServerError, ServerResult};

/// What a tool handler returns: either a free-form value that the server
/// wraps as a text block, or a pre-formatted MCP result passed through
/// unchanged.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// Free-form value, serialized into a text content block
    Value(Value),
    /// Pre-formatted result, passed through as-is
    Preformatted(CallToolResult),
}

impl ToolOutput {
    /// Classify a raw value: mappings that structurally look like a call
    /// result (non-empty `content` whose first element has `type` and
    /// `text`) pass through, everything else is wrapped.
    pub fn from_value(value: Value) -> Self {
        if CallToolResult::matches(&value) {
            if let Ok(result) = serde_json::from_value::<CallToolResult>(value.clone()) {
                return Self::Preformatted(result);
            }
        }
        Self::Value(value)
    }

    /// Convert into the wire result. Strings become the text verbatim;
    /// other values are JSON-stringified.
    pub fn into_call_result(self) -> ServerResult<CallToolResult> {
        match self {
            Self::Preformatted(result) => Ok(result),
            Self::Value(Value::String(text)) => Ok(CallToolResult::text(text)),
            Self::Value(other) => Ok(CallToolResult::text(serde_json::to_string(&other)?)),
        }
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// A registered tool's behaviour.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool.
    async fn call(&self, args: Value, ctx: &InvocationContext) -> ServerResult<ToolOutput>;
}

/// Boxed future returned by [`FunctionTool`] closures.
pub type BoxedToolFuture = Pin<Box<dyn Future<Output = ServerResult<ToolOutput>> + Send>>;

/// Adapter turning an async closure over the arguments into a
/// [`ToolHandler`].
pub struct FunctionTool<F> {
    func: F,
}

impl<F> FunctionTool<F>
where
    F: Fn(Value) -> BoxedToolFuture + Send + Sync,
{
    /// Wrap a closure. The closure receives the (validated) arguments.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> ToolHandler for FunctionTool<F>
where
    F: Fn(Value) -> BoxedToolFuture + Send + Sync,
{
    async fn call(&self, args: Value, _ctx: &InvocationContext) -> ServerResult<ToolOutput> {
        (self.func)(args).await
    }
}

/// Everything needed to register a tool.
pub struct ToolRegistration {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// JSON Schema for the arguments
    pub input_schema: Value,
    /// Scopes a caller must hold; empty means unrestricted
    pub required_scopes: Vec<String>,
    /// Opaque metadata surfaced in `tools/list`
    pub metadata: Option<Value>,
    /// The tool behaviour
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolRegistration {
    /// Registration with an empty object schema and no scopes.
    pub fn new(name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: json!({"type": "object"}),
            required_scopes: Vec::new(),
            metadata: None,
            handler,
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the argument schema.
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Require scopes for invocation.
    pub fn required_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Attach opaque metadata.
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl std::fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("name", &self.name)
            .field("required_scopes", &self.required_scopes)
            .finish_non_exhaustive()
    }
}

/// A registered tool.
pub struct ToolEntry {
    /// Wire descriptor
    pub descriptor: Tool,
    /// Scopes a caller must hold
    pub required_scopes: Vec<String>,
    /// The tool behaviour
    pub handler: Arc<dyn ToolHandler>,
}

/// Name-keyed tool storage.
///
/// Insert-only before the server starts; afterwards, only
/// [`live_register`](Self::live_register) / [`unregister`](Self::unregister)
/// mutate the map, atomically, so concurrent `tools/list` stays consistent.
/// In-flight calls that already resolved a handler complete with it even if
/// the tool is unregistered underneath them.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolEntry>>>,
    started: AtomicBool,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.read().len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register tools before start. Atomic: duplicate names — among the
    /// batch or against existing tools — fail the whole batch.
    pub fn register(&self, registrations: Vec<ToolRegistration>) -> ServerResult<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(ServerError::Registry(
                "tools cannot be registered after start; use live_register".to_string(),
            ));
        }
        self.insert_batch(registrations)
    }

    fn insert_batch(&self, registrations: Vec<ToolRegistration>) -> ServerResult<()> {
        let mut tools = self.tools.write();

        let mut batch_names = Vec::with_capacity(registrations.len());
        for reg in &registrations {
            if tools.contains_key(&reg.name) || batch_names.contains(&reg.name) {
                return Err(ServerError::Registry(format!(
                    "tool '{}' is already registered",
                    reg.name
                )));
            }
            batch_names.push(reg.name.clone());
        }

        for reg in registrations {
            let entry = ToolEntry {
                descriptor: Tool {
                    name: reg.name.clone(),
                    description: reg.description,
                    input_schema: reg.input_schema,
                    meta: reg.metadata,
                },
                required_scopes: reg.required_scopes,
                handler: reg.handler,
            };
            tools.insert(reg.name, Arc::new(entry));
        }
        Ok(())
    }

    /// Mark the registry started; plain `register` is refused from here on.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    /// Register a tool while the server is running. Fails on duplicates.
    pub fn live_register(&self, registration: ToolRegistration) -> ServerResult<()> {
        self.insert_batch(vec![registration])
    }

    /// Remove a tool while the server is running. In-flight calls keep the
    /// handler they already cloned out of the map.
    pub fn unregister(&self, name: &str) -> ServerResult<()> {
        match self.tools.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(ServerError::UnknownTool {
                name: name.to_string(),
            }),
        }
    }

    /// Look up a tool.
    pub fn get(&self, name: &str) -> Option<Arc<ToolEntry>> {
        self.tools.read().get(name).cloned()
    }

    /// Consistent snapshot of all tool descriptors, name-sorted.
    pub fn descriptors(&self) -> Vec<Tool> {
        let tools = self.tools.read();
        let mut out: Vec<Tool> = tools.values().map(|t| t.descriptor.clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Map of tool name to required scopes, for tools that declare any.
    /// Computed at pipeline build time.
    pub fn scope_map(&self) -> HashMap<String, Vec<String>> {
        self.tools
            .read()
            .iter()
            .filter(|(_, entry)| !entry.required_scopes.is_empty())
            .map(|(name, entry)| (name.clone(), entry.required_scopes.clone()))
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered resource's behaviour.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource. Receives the parsed URI.
    async fn read(&self, uri: &Url) -> ServerResult<ResourceContents>;
}

/// Everything needed to register a resource.
pub struct ResourceRegistration {
    /// Unique resource URI
    pub uri: String,
    /// Display name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// MIME type of the content
    pub mime_type: Option<String>,
    /// The resource behaviour
    pub handler: Arc<dyn ResourceHandler>,
}

impl std::fmt::Debug for ResourceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistration")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A registered resource.
pub struct ResourceEntry {
    /// Wire descriptor
    pub descriptor: Resource,
    /// Parsed URI handed to the handler
    pub uri: Url,
    /// The resource behaviour
    pub handler: Arc<dyn ResourceHandler>,
}

/// URI-keyed resource storage.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: RwLock<HashMap<String, Arc<ResourceEntry>>>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.resources.read().len())
            .finish()
    }
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch of resources atomically.
    ///
    /// Preconditions — every URI parses and none already exists — are
    /// checked for the whole batch before anything is inserted; a failure
    /// leaves the registry untouched. URIs outside the `ui:` scheme are
    /// registered with a warning.
    pub fn register(&self, registrations: Vec<ResourceRegistration>) -> ServerResult<()> {
        let mut resources = self.resources.write();

        let mut parsed = Vec::with_capacity(registrations.len());
        let mut batch_uris: Vec<String> = Vec::with_capacity(registrations.len());
        for reg in &registrations {
            let uri = Url::parse(&reg.uri).map_err(|e| {
                ServerError::Registry(format!("invalid resource URI '{}': {e}", reg.uri))
            })?;
            if resources.contains_key(&reg.uri) || batch_uris.contains(&reg.uri) {
                return Err(ServerError::Registry(format!(
                    "resource '{}' is already registered",
                    reg.uri
                )));
            }
            batch_uris.push(reg.uri.clone());
            parsed.push(uri);
        }

        for (reg, uri) in registrations.into_iter().zip(parsed) {
            if uri.scheme() != "ui" {
                warn!(uri = %reg.uri, scheme = %uri.scheme(), "Resource URI is not ui: scheme");
            }
            let entry = ResourceEntry {
                descriptor: Resource {
                    uri: reg.uri.clone(),
                    name: reg.name,
                    description: reg.description,
                    mime_type: reg.mime_type,
                },
                uri,
                handler: reg.handler,
            };
            resources.insert(reg.uri, Arc::new(entry));
        }
        Ok(())
    }

    /// Look up a resource by URI.
    pub fn get(&self, uri: &str) -> Option<Arc<ResourceEntry>> {
        self.resources.read().get(uri).cloned()
    }

    /// Snapshot of all resource descriptors, URI-sorted.
    pub fn descriptors(&self) -> Vec<Resource> {
        let resources = self.resources.read();
        let mut out: Vec<Resource> = resources.values().map(|r| r.descriptor.clone()).collect();
        out.sort_by(|a, b| a.uri.cmp(&b.uri));
        out
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    /// Whether no resources are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
