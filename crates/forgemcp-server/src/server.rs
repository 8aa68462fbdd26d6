//! Server core and builder.
//!
//! The builder collects tools, resources, auth and limits, then assembles
//! the middleware pipeline in its fixed order. The resulting [`McpServer`]
//! exposes the core operations both transports dispatch to, and owns the
//! shutdown ordering: reaper, then pending sampling requests, then SSE
//! streams, then the HTTP listener.

use forgemcp_auth::{AuthInfo, AuthProvider};
use forgemcp_protocol::types::{
    CallToolResult, InitializeResult, ListResourcesResult, ListToolsResult, ReadResourceResult,
    ServerCapabilities, ServerInfo,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{
    CorsConfig, IpRateLimitConfig, ServerConfig, INITIALIZE_MAX_REQUESTS, INITIALIZE_WINDOW,
};
use crate::context::{InvocationContext, RequestInfo};
use crate::error::{ServerError, ServerResult};
use crate::limits::{RateLimitConfig, SlidingWindowLimiter};
use crate::middleware::{
    AuthMiddleware, BackpressureMiddleware, RateLimitKeyFn, RateLimitMiddleware, RateLimitMode,
    ScopeCheckMiddleware, ToolMiddleware, ToolPipeline, ValidationMiddleware,
};
use crate::queue::{QueueConfig, RequestQueue};
use crate::registry::{
    ResourceRegistration, ResourceRegistry, ToolRegistration, ToolRegistry,
};
use crate::sampling::PendingRequests;
use crate::session::{SessionStore, SseRegistry};
use crate::telemetry;
use crate::validation::SchemaValidator;

pub(crate) struct ServerCore {
    pub(crate) config: ServerConfig,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) resources: Arc<ResourceRegistry>,
    pub(crate) expect_resources: bool,
    pub(crate) validator: Arc<SchemaValidator>,
    pub(crate) pipeline: ToolPipeline,
    pub(crate) queue: Arc<RequestQueue>,
    pub(crate) auth: Option<Arc<dyn AuthProvider>>,
    pub(crate) sessions: SessionStore,
    pub(crate) sse: SseRegistry,
    pub(crate) sampling: PendingRequests,
    pub(crate) ip_rate_limit: Option<(IpRateLimitConfig, SlidingWindowLimiter)>,
    pub(crate) init_limiter: SlidingWindowLimiter,
    pub(crate) custom_routes: Vec<axum::Router>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) reaper: CancellationToken,
}

/// The assembled MCP server. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct McpServer {
    pub(crate) inner: Arc<ServerCore>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.inner.config.name)
            .field("tools", &self.inner.tools.len())
            .field("resources", &self.inner.resources.len())
            .field("auth", &self.inner.auth.is_some())
            .finish()
    }
}

impl McpServer {
    /// Start building a server.
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::default()
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// The configured auth provider, if any.
    pub fn auth_provider(&self) -> Option<&Arc<dyn AuthProvider>> {
        self.inner.auth.as_ref()
    }

    /// The initialize handshake result: protocol revision, capabilities
    /// and server identity. The `resources` capability is advertised iff
    /// any resource is registered or the builder pre-declared them.
    pub fn initialize_result(&self) -> InitializeResult {
        let resources =
            (self.inner.expect_resources || !self.inner.resources.is_empty()).then(|| json!({}));
        InitializeResult {
            protocol_version: self.inner.config.protocol_version.clone(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                resources,
            },
            server_info: ServerInfo {
                name: self.inner.config.name.clone(),
                version: self.inner.config.version.clone(),
            },
        }
    }

    /// Consistent snapshot of registered tools.
    pub fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.inner.tools.descriptors(),
            next_cursor: None,
        }
    }

    /// Snapshot of registered resources.
    pub fn list_resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: self.inner.resources.descriptors(),
        }
    }

    /// Run a tool call through the middleware pipeline.
    ///
    /// `request` and `session_id` are set on the HTTP path and unset on
    /// stdio; the auth middleware keys off that distinction.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        request: Option<RequestInfo>,
        session_id: Option<String>,
    ) -> ServerResult<CallToolResult> {
        let started = Instant::now();
        let mut ctx = InvocationContext::new(name, args);
        ctx.request = request;
        ctx.session_id = session_id;

        let outcome = self.inner.pipeline.run(&mut ctx).await;
        telemetry::set_requests_in_flight(self.inner.queue.in_flight());
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(output) => {
                telemetry::record_tool_call(name, true, elapsed);
                output.into_call_result()
            }
            Err(err) => {
                telemetry::record_tool_call(name, false, elapsed);
                if matches!(err, ServerError::Handler { .. }) {
                    error!(tool = %name, error = %err, "Tool handler failed");
                }
                Err(err)
            }
        }
    }

    /// Read a resource by URI, applying CSP injection to HTML content when
    /// a policy is configured.
    pub async fn read_resource(&self, uri: &str) -> ServerResult<ReadResourceResult> {
        let entry = self
            .inner
            .resources
            .get(uri)
            .ok_or_else(|| ServerError::ResourceNotFound {
                uri: uri.to_string(),
            })?;

        let mut contents = entry.handler.read(&entry.uri).await?;
        if let Some(policy) = &self.inner.config.resource_csp {
            let is_html = contents
                .mime_type
                .as_deref()
                .is_some_and(forgemcp_security::is_html_mime);
            if is_html {
                contents.text = forgemcp_security::inject_csp(&contents.text, policy);
            }
        }
        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }

    /// Bearer gate used by the HTTP layer for methods outside the
    /// pipeline (`tools/list`, `resources/*`, the SSE stream).
    ///
    /// With no provider configured everything passes. Verification uses
    /// the same provider (and therefore the same token cache) as the
    /// pipeline's auth middleware.
    pub async fn authorize_bearer(
        &self,
        authorization: Option<&str>,
    ) -> ServerResult<Option<AuthInfo>> {
        let Some(provider) = &self.inner.auth else {
            return Ok(None);
        };
        let metadata_url = provider.resource_metadata().metadata_url();

        let token = authorization.and_then(forgemcp_auth::extract_bearer);
        let Some(token) = token else {
            telemetry::record_auth_event("reject");
            return Err(forgemcp_auth::AuthError::missing_token(Some(metadata_url)).into());
        };
        match provider.verify_token(token).await {
            Some(info) => {
                telemetry::record_auth_event("verify");
                Ok(Some(info))
            }
            None => {
                telemetry::record_auth_event("reject");
                Err(forgemcp_auth::AuthError::invalid_token(Some(metadata_url)).into())
            }
        }
    }

    /// Register a tool while running. The new tool is visible to the next
    /// `tools/list`; its schema is compiled before the name is published.
    pub fn live_register(&self, registration: ToolRegistration) -> ServerResult<()> {
        self.inner
            .validator
            .register(&registration.name, &registration.input_schema)?;
        let name = registration.name.clone();
        let result = self.inner.tools.live_register(registration);
        if result.is_err() {
            self.inner.validator.unregister(&name);
        }
        result
    }

    /// Unregister a tool while running. In-flight calls complete with the
    /// handler they already hold.
    pub fn live_unregister(&self, name: &str) -> ServerResult<()> {
        self.inner.tools.unregister(name)?;
        self.inner.validator.unregister(name);
        Ok(())
    }

    /// Send a server-initiated notification to a session's SSE clients.
    /// Returns the number of clients that accepted the frame.
    pub fn send_notification(
        &self,
        session_key: &str,
        method: &str,
        params: Value,
    ) -> ServerResult<usize> {
        let frame = serde_json::to_string(
            &forgemcp_protocol::jsonrpc::JsonRpcNotification::new(method, Some(params)),
        )?;
        Ok(self.inner.sse.send_to_session(session_key, &frame))
    }

    /// Send a server-initiated request to a session and await the
    /// client's response, with the sampling timeout applied.
    pub async fn send_request(
        &self,
        session_key: &str,
        method: &str,
        params: Value,
    ) -> ServerResult<Value> {
        self.inner
            .sampling
            .request(&self.inner.sse, session_key, method, params)
            .await
    }

    /// Shut the server down in the required order: stop the session
    /// reaper, cancel pending sampling requests, close every SSE stream
    /// (otherwise in-flight streams prevent listener drain), then release
    /// the HTTP listener.
    pub fn shutdown(&self) {
        info!(server = %self.inner.config.name, "Shutting down");
        self.inner.reaper.cancel();
        self.inner.sampling.cancel_all();
        self.inner.sse.close_all();
        self.inner.shutdown.cancel();
    }

    /// Token cancelled once [`shutdown`](Self::shutdown) has run.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Serve the HTTP transport until [`shutdown`](Self::shutdown).
    pub async fn serve_http(&self, addr: std::net::SocketAddr) -> ServerResult<()> {
        crate::http::serve(self, addr).await
    }

    /// Run the stdio transport until EOF or [`shutdown`](Self::shutdown).
    /// Discards the notification handle; use
    /// [`StdioTransport::new`](crate::stdio::StdioTransport::new) to keep it.
    pub async fn run_stdio(&self) -> ServerResult<()> {
        let (transport, _notifier) = crate::stdio::StdioTransport::new(self.clone());
        transport.run().await
    }
}

type UserMiddlewares = Vec<Arc<dyn ToolMiddleware>>;

/// Builder for [`McpServer`].
#[derive(Default)]
pub struct McpServerBuilder {
    config: ServerConfig,
    tools: Vec<ToolRegistration>,
    resources: Vec<ResourceRegistration>,
    expect_resources: bool,
    auth: Option<Arc<dyn AuthProvider>>,
    user_middlewares: UserMiddlewares,
    tool_rate_limit: Option<(RateLimitConfig, RateLimitMode, Option<Arc<RateLimitKeyFn>>)>,
    ip_rate_limit: Option<IpRateLimitConfig>,
    queue: QueueConfig,
    custom_routes: Vec<axum::Router>,
}

impl std::fmt::Debug for McpServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerBuilder")
            .field("name", &self.config.name)
            .field("tools", &self.tools.len())
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

impl McpServerBuilder {
    /// Set the advertised server name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the advertised server version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Add one tool.
    pub fn tool(mut self, registration: ToolRegistration) -> Self {
        self.tools.push(registration);
        self
    }

    /// Add several tools; registration stays atomic at build time.
    pub fn tools(mut self, registrations: impl IntoIterator<Item = ToolRegistration>) -> Self {
        self.tools.extend(registrations);
        self
    }

    /// Add resources; the batch registers atomically at build time.
    pub fn resources(
        mut self,
        registrations: impl IntoIterator<Item = ResourceRegistration>,
    ) -> Self {
        self.resources.extend(registrations);
        self
    }

    /// Advertise the `resources` capability before any resource is
    /// registered, so late-bound resources appear without renegotiation.
    pub fn expect_resources(mut self) -> Self {
        self.expect_resources = true;
        self
    }

    /// Install a bearer auth provider. Presence of a provider inserts the
    /// auth middleware into the pipeline.
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(provider);
        self
    }

    /// Append a user middleware. User middlewares run between auth and
    /// the scope check, in registration order.
    pub fn middleware(mut self, middleware: Arc<dyn ToolMiddleware>) -> Self {
        self.user_middlewares.push(middleware);
        self
    }

    /// Enable per-tool rate limiting.
    pub fn rate_limit(
        mut self,
        limit: RateLimitConfig,
        mode: RateLimitMode,
        key_fn: Option<Arc<RateLimitKeyFn>>,
    ) -> Self {
        self.tool_rate_limit = Some((limit, mode, key_fn));
        self
    }

    /// Enable IP-level rate limiting on the HTTP transport.
    pub fn ip_rate_limit(mut self, config: IpRateLimitConfig) -> Self {
        self.ip_rate_limit = Some(config);
        self
    }

    /// Configure the backpressure queue.
    pub fn backpressure(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Cap request bodies; `None` disables the check.
    pub fn max_body_bytes(mut self, limit: Option<usize>) -> Self {
        self.config.max_body_bytes = limit;
        self
    }

    /// Enable CORS.
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = Some(cors);
        self
    }

    /// Inject this CSP policy into HTML resource reads.
    pub fn resource_csp(mut self, policy: impl Into<String>) -> Self {
        self.config.resource_csp = Some(policy.into());
        self
    }

    /// Override session limits (mainly for tests).
    pub fn session_config(mut self, session: crate::session::SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Mount extra routes on the HTTP transport. Custom routes are merged
    /// ahead of the built-ins so the generic `/` cannot shadow them.
    pub fn route(mut self, router: axum::Router) -> Self {
        self.custom_routes.push(router);
        self
    }

    /// Assemble the server: register everything, compile schemas, build
    /// the pipeline in its fixed order, and freeze plain registration.
    pub fn build(self) -> ServerResult<McpServer> {
        let tools = Arc::new(ToolRegistry::new());
        let resources = Arc::new(ResourceRegistry::new());
        let validator = Arc::new(SchemaValidator::new());

        for registration in &self.tools {
            validator.register(&registration.name, &registration.input_schema)?;
        }
        tools.register(self.tools)?;
        resources.register(self.resources)?;

        let queue = RequestQueue::new(self.queue);
        let scope_map = tools.scope_map();

        let rate_limit = self.tool_rate_limit.map(|(limit, mode, key_fn)| {
            Arc::new(RateLimitMiddleware::new(
                Arc::new(SlidingWindowLimiter::new(limit)),
                mode,
                key_fn,
            ))
        });
        let auth_middleware = self
            .auth
            .as_ref()
            .map(|provider| Arc::new(AuthMiddleware::new(Arc::clone(provider))));
        let scope_check = (!scope_map.is_empty())
            .then(|| Arc::new(ScopeCheckMiddleware::new(scope_map)));
        let validation = Some(Arc::new(ValidationMiddleware::new(Arc::clone(&validator))));
        let backpressure = Arc::new(BackpressureMiddleware::new(Arc::clone(&queue)));

        let pipeline = ToolPipeline::assemble(
            Arc::clone(&tools),
            rate_limit,
            auth_middleware,
            self.user_middlewares,
            scope_check,
            validation,
            backpressure,
        );
        tools.mark_started();

        if let Some(CorsConfig { origins }) = &self.config.cors {
            if origins.is_empty() {
                warn!("CORS configured with wildcard origin");
            }
        }

        let ip_rate_limit = self
            .ip_rate_limit
            .map(|config| {
                let limiter = SlidingWindowLimiter::new(config.limit);
                (config, limiter)
            });

        let core = ServerCore {
            sessions: SessionStore::new(self.config.session.clone()),
            config: self.config,
            tools,
            resources,
            expect_resources: self.expect_resources,
            validator,
            pipeline,
            queue,
            auth: self.auth,
            sse: SseRegistry::new(),
            sampling: PendingRequests::default(),
            ip_rate_limit,
            init_limiter: SlidingWindowLimiter::new(RateLimitConfig {
                max_requests: INITIALIZE_MAX_REQUESTS,
                window_ms: INITIALIZE_WINDOW.as_millis() as u64,
            }),
            custom_routes: self.custom_routes,
            shutdown: CancellationToken::new(),
            reaper: CancellationToken::new(),
        };

        Ok(McpServer {
            inner: Arc::new(core),
        })
    }
}
