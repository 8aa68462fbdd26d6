//! Pipeline composition tests: fixed ordering, transport-sensitive auth,
//! scope enforcement, and backpressure release on every exit path.

use async_trait::async_trait;
use forgemcp_auth::testing::MockAuthProvider;
use forgemcp_auth::{AuthErrorCode, AuthInfo};
use forgemcp_server::context::{InvocationContext, RequestInfo};
use forgemcp_server::middleware::{Next, ToolMiddleware};
use forgemcp_server::registry::{
    BoxedToolFuture, FunctionTool, ToolHandler, ToolOutput, ToolRegistration,
};
use forgemcp_server::{
    McpServer, OverflowStrategy, QueueConfig, ServerError, ServerResult,
};
use http::HeaderMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn echo_tool(name: &str) -> ToolRegistration {
    ToolRegistration::new(
        name,
        Arc::new(FunctionTool::new(|args| {
            Box::pin(async move { Ok(ToolOutput::Value(args)) }) as BoxedToolFuture
        })),
    )
    .input_schema(json!({"type": "object"}))
}

fn bearer_request(token: &str) -> RequestInfo {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
    RequestInfo {
        headers,
        client_ip: "203.0.113.5".into(),
    }
}

fn reader_identity() -> AuthInfo {
    AuthInfo {
        subject: "reader".into(),
        client_id: None,
        scopes: vec!["read".into()],
        claims: json!({"sub": "reader"}),
        expires_at: None,
    }
}

/// Records what it observes about the context when it runs.
struct Probe {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ToolMiddleware for Probe {
    async fn handle(
        &self,
        ctx: &mut InvocationContext,
        next: Next<'_>,
    ) -> ServerResult<ToolOutput> {
        let auth_seen = ctx.auth().is_some();
        let defaults_applied = ctx.args.get("filled").is_some();
        self.log.lock().push(format!(
            "probe auth={auth_seen} defaults={defaults_applied}"
        ));
        next.run(ctx).await
    }
}

#[tokio::test]
async fn user_middleware_runs_after_auth_and_before_validation() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let provider = Arc::new(MockAuthProvider::new("https://mcp.test").allow_all(reader_identity()));

    let server = McpServer::builder()
        .tool(echo_tool("echo").input_schema(json!({
            "type": "object",
            "properties": {"filled": {"type": "string", "default": "yes"}}
        })))
        .auth_provider(provider)
        .middleware(Arc::new(Probe { log: Arc::clone(&log) }))
        .build()
        .unwrap();

    let result = server
        .call_tool("echo", json!({}), Some(bearer_request("tok")), None)
        .await
        .unwrap();

    // Auth ran before the probe; validation (defaults) ran after it.
    assert_eq!(log.lock().as_slice(), ["probe auth=true defaults=false"]);
    // And the handler saw the default applied by validation.
    assert!(result.content[0].text.contains("yes"));
}

#[tokio::test]
async fn auth_middleware_short_circuits_on_stdio() {
    // Provider rejects every token; without a request attached it must
    // never be consulted.
    let provider = Arc::new(MockAuthProvider::new("https://mcp.test"));
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .auth_provider(provider)
        .build()
        .unwrap();

    server.call_tool("echo", json!({}), None, None).await.unwrap();
}

#[tokio::test]
async fn http_call_without_bearer_is_missing_token() {
    let provider = Arc::new(MockAuthProvider::new("https://mcp.test"));
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .auth_provider(provider)
        .build()
        .unwrap();

    let request = RequestInfo {
        headers: HeaderMap::new(),
        client_ip: "203.0.113.5".into(),
    };
    let err = server
        .call_tool("echo", json!({}), Some(request), None)
        .await
        .unwrap_err();
    match err {
        ServerError::Auth(auth) => {
            assert_eq!(auth.code, AuthErrorCode::MissingToken);
            assert!(auth.resource_metadata_url.is_some());
        }
        other => panic!("expected auth error, got {other}"),
    }
}

#[tokio::test]
async fn scope_check_reports_missing_scopes() {
    let provider = Arc::new(MockAuthProvider::new("https://mcp.test").allow_all(reader_identity()));
    let server = McpServer::builder()
        .tool(echo_tool("admin_action").required_scopes(["admin", "read"]))
        .auth_provider(provider)
        .build()
        .unwrap();

    let err = server
        .call_tool("admin_action", json!({}), Some(bearer_request("tok")), None)
        .await
        .unwrap_err();
    match err {
        ServerError::Auth(auth) => {
            assert_eq!(auth.code, AuthErrorCode::InsufficientScope);
            assert_eq!(auth.missing_scopes, Some(vec!["admin".to_string()]));
        }
        other => panic!("expected scope error, got {other}"),
    }
}

#[tokio::test]
async fn scope_check_passes_on_stdio_without_auth() {
    // Scoped tool, no auth provider: the local transport passes.
    let server = McpServer::builder()
        .tool(echo_tool("admin_action").required_scopes(["admin"]))
        .build()
        .unwrap();

    server
        .call_tool("admin_action", json!({}), None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn scope_check_without_auth_on_http_fails_loudly() {
    // Scoped tool, no auth provider, but an HTTP request: that is a
    // pipeline misconfiguration, not a 401.
    let server = McpServer::builder()
        .tool(echo_tool("admin_action").required_scopes(["admin"]))
        .build()
        .unwrap();

    let request = RequestInfo {
        headers: HeaderMap::new(),
        client_ip: "203.0.113.5".into(),
    };
    let err = server
        .call_tool("admin_action", json!({}), Some(request), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Pipeline(_)), "got {err}");
}

#[tokio::test]
async fn auth_info_is_frozen_for_downstream_middlewares() {
    struct Mutator;

    #[async_trait]
    impl ToolMiddleware for Mutator {
        async fn handle(
            &self,
            ctx: &mut InvocationContext,
            next: Next<'_>,
        ) -> ServerResult<ToolOutput> {
            let err = ctx
                .set_auth(AuthInfo {
                    subject: "intruder".into(),
                    client_id: None,
                    scopes: vec!["admin".into()],
                    claims: json!({}),
                    expires_at: None,
                })
                .unwrap_err();
            assert!(matches!(err, ServerError::Pipeline(_)));
            next.run(ctx).await
        }
    }

    let provider = Arc::new(MockAuthProvider::new("https://mcp.test").allow_all(reader_identity()));
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .auth_provider(provider)
        .middleware(Arc::new(Mutator))
        .build()
        .unwrap();

    server
        .call_tool("echo", json!({}), Some(bearer_request("tok")), None)
        .await
        .unwrap();
}

struct FailingTool;

#[async_trait]
impl ToolHandler for FailingTool {
    async fn call(&self, _args: Value, _ctx: &InvocationContext) -> ServerResult<ToolOutput> {
        Err(ServerError::handler("intentional failure"))
    }
}

#[tokio::test]
async fn backpressure_releases_on_handler_error() {
    let server = McpServer::builder()
        .tool(ToolRegistration::new("fail", Arc::new(FailingTool)))
        .backpressure(QueueConfig {
            max_concurrent: 1,
            strategy: OverflowStrategy::Reject,
            sleep_ms: 10,
        })
        .build()
        .unwrap();

    // If the slot leaked on the error path, the second call would be a
    // capacity reject instead of another handler error.
    for _ in 0..3 {
        let err = server.call_tool("fail", json!({}), None, None).await.unwrap_err();
        assert!(matches!(err, ServerError::Handler { .. }), "got {err}");
    }
}

#[tokio::test]
async fn backpressure_rejects_concurrent_overflow() {
    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        async fn call(&self, _args: Value, _ctx: &InvocationContext) -> ServerResult<ToolOutput> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(ToolOutput::Value(json!("done")))
        }
    }

    let server = McpServer::builder()
        .tool(ToolRegistration::new("slow", Arc::new(SlowTool)))
        .backpressure(QueueConfig {
            max_concurrent: 1,
            strategy: OverflowStrategy::Reject,
            sleep_ms: 10,
        })
        .build()
        .unwrap();

    let first = {
        let server = server.clone();
        tokio::spawn(async move { server.call_tool("slow", json!({}), None, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = server.call_tool("slow", json!({}), None, None).await.unwrap_err();
    assert!(err.to_string().contains("Capacity exceeded"));
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_tool_surfaces_from_the_terminal_dispatch() {
    let server = McpServer::builder().tool(echo_tool("echo")).build().unwrap();
    let err = server.call_tool("nope", json!({}), None, None).await.unwrap_err();
    assert_eq!(err.to_string(), "Unknown tool: nope");
}

#[tokio::test]
async fn validation_rejects_bad_arguments() {
    let server = McpServer::builder()
        .tool(echo_tool("strict").input_schema(json!({
            "type": "object",
            "properties": {"n": {"type": "integer"}},
            "required": ["n"]
        })))
        .build()
        .unwrap();

    let err = server
        .call_tool("strict", json!({"n": "NaN"}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServerError::Validation { .. }), "got {err}");

    server
        .call_tool("strict", json!({"n": 3}), None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn live_register_and_unregister() {
    let server = McpServer::builder().tool(echo_tool("echo")).build().unwrap();

    server.live_register(echo_tool("late")).unwrap();
    server.call_tool("late", json!({}), None, None).await.unwrap();
    assert_eq!(server.list_tools().tools.len(), 2);

    server.live_unregister("late").unwrap();
    let err = server.call_tool("late", json!({}), None, None).await.unwrap_err();
    assert!(matches!(err, ServerError::UnknownTool { .. }));
}
