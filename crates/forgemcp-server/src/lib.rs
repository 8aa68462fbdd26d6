//! Production-grade MCP server framework.
//!
//! forgemcp publishes tools and resources over a local stdio transport and
//! a networked HTTP transport with SSE streaming. The control plane is
//! what makes it production-worthy rather than a toy dispatcher:
//!
//! - an onion-composed middleware pipeline with a fixed, audited order
//!   (rate-limit → auth → user middleware → scope check → validation →
//!   backpressure → handler);
//! - a bounded request queue with three admission strategies and a
//!   sliding-window rate limiter;
//! - JWKS-backed bearer authentication with a bounded token cache and
//!   per-tool scope enforcement (see `forgemcp-auth`);
//! - session lifecycle with TTL reaping, SSE fan-out with dead-peer
//!   reaping, body caps and per-IP admission guards;
//! - an atomic tool/resource registry with live re-registration.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use forgemcp_server::{McpServer, registry::{FunctionTool, ToolOutput, ToolRegistration}};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = McpServer::builder()
//!     .name("demo")
//!     .tool(
//!         ToolRegistration::new(
//!             "echo",
//!             Arc::new(FunctionTool::new(|args| {
//!                 Box::pin(async move { Ok(ToolOutput::Value(args)) })
//!             })),
//!         )
//!         .description("Echo the arguments back")
//!         .input_schema(json!({"type": "object"})),
//!     )
//!     .build()?;
//!
//! server.serve_http(([127, 0, 0, 1], 8080).into()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod limits;
pub mod middleware;
pub mod queue;
pub mod registry;
pub mod sampling;
pub mod server;
pub mod session;
pub mod stdio;
pub mod telemetry;
pub mod validation;

pub use config::{CorsConfig, HttpRequestMeta, IpRateLimitConfig, ServerConfig};
pub use context::{InvocationContext, RequestInfo};
pub use error::{ServerError, ServerResult};
pub use limits::{RateLimitConfig, SlidingWindowLimiter};
pub use middleware::{Next, RateLimitMode, ToolMiddleware, ToolPipeline};
pub use queue::{OverflowStrategy, QueueConfig, QueuePermit, RequestQueue};
pub use registry::{
    ResourceHandler, ResourceRegistration, ResourceRegistry, ToolHandler, ToolOutput,
    ToolRegistration, ToolRegistry,
};
pub use server::{McpServer, McpServerBuilder};
pub use session::{Session, SessionConfig, SessionStore};
pub use stdio::{NotificationSender, StdioTransport};
pub use validation::SchemaValidator;

// Re-exported so operators configure auth without a direct dependency.
pub use forgemcp_auth as auth;
