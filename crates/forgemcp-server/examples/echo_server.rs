//! A small HTTP server exposing one open tool and one scoped tool.
//!
//! Run with:
//!
//! ```text
//! MCP_AUTH_PROVIDER=oidc \
//! MCP_AUTH_ISSUER=https://issuer.example.com \
//! MCP_AUTH_AUDIENCE=https://mcp.example.com \
//! MCP_AUTH_RESOURCE=https://mcp.example.com \
//! cargo run --example echo_server
//! ```
//!
//! Without the environment variables auth stays disabled and every tool is
//! open.

use std::sync::Arc;

use forgemcp_server::auth::{AuthSettings, JwtAuthProvider};
use forgemcp_server::registry::{FunctionTool, ToolOutput, ToolRegistration};
use forgemcp_server::{
    CorsConfig, IpRateLimitConfig, McpServer, RateLimitConfig, ServerResult,
};
use serde_json::json;

#[tokio::main]
async fn main() -> ServerResult<()> {
    forgemcp_server::telemetry::init_tracing();

    let mut builder = McpServer::builder()
        .name("echo-server")
        .version(env!("CARGO_PKG_VERSION"))
        .tool(
            ToolRegistration::new(
                "echo",
                Arc::new(FunctionTool::new(|args| {
                    Box::pin(async move { Ok(ToolOutput::Value(args)) })
                })),
            )
            .description("Echo the arguments back")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "default": "hello"}
                }
            })),
        )
        .tool(
            ToolRegistration::new(
                "admin_echo",
                Arc::new(FunctionTool::new(|args| {
                    Box::pin(async move { Ok(ToolOutput::Value(args)) })
                })),
            )
            .description("Echo, but only for admins")
            .required_scopes(["admin"]),
        )
        .ip_rate_limit(IpRateLimitConfig::reject(RateLimitConfig {
            max_requests: 120,
            window_ms: 60_000,
        }))
        .cors(CorsConfig {
            origins: vec!["https://app.example.com".to_string()],
        });

    let settings = AuthSettings::load("forgemcp.yaml")
        .map_err(|e| forgemcp_server::ServerError::Configuration(e.to_string()))?;
    if let Some(config) = settings
        .into_jwt_config()
        .map_err(|e| forgemcp_server::ServerError::Configuration(e.to_string()))?
    {
        builder = builder.auth_provider(Arc::new(JwtAuthProvider::new(config)));
    }

    let server = builder.build()?;
    server.serve_http(([127, 0, 0, 1], 8080).into()).await
}
