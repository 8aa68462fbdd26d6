//! HTTP transport tests, driving the axum router in-process.

use axum::body::Body;
use forgemcp_auth::testing::MockAuthProvider;
use forgemcp_auth::AuthInfo;
use forgemcp_server::registry::{BoxedToolFuture, FunctionTool, ToolOutput, ToolRegistration};
use forgemcp_server::{
    CorsConfig, IpRateLimitConfig, McpServer, RateLimitConfig,
};
use http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn echo_tool(name: &str) -> ToolRegistration {
    ToolRegistration::new(
        name,
        Arc::new(FunctionTool::new(|args| {
            Box::pin(async move { Ok(ToolOutput::Value(args)) }) as BoxedToolFuture
        })),
    )
    .input_schema(json!({"type": "object"}))
}

fn plain_server() -> McpServer {
    McpServer::builder()
        .name("http-test")
        .version("1.2.3")
        .tool(echo_tool("echo"))
        .build()
        .unwrap()
}

fn rpc_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn rpc_request_with(body: Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn initialize(app: &axum::Router) -> (String, Value) {
    let response = app
        .clone()
        .oneshot(rpc_request(json!({"jsonrpc": "2.0", "method": "initialize", "id": 1})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = response
        .headers()
        .get("mcp-session-id")
        .expect("initialize must set the session header")
        .to_str()
        .unwrap()
        .to_string();
    let body = body_json(response).await;
    (session, body)
}

#[tokio::test]
async fn initialize_then_list_tools_without_auth() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let (session, body) = initialize(&app).await;
    assert_eq!(session.len(), 32);
    assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(body["result"]["serverInfo"]["name"], "http-test");
    assert_eq!(body["result"]["capabilities"]["tools"], json!({}));
    // No resources registered: the capability is not advertised.
    assert!(body["result"]["capabilities"].get("resources").is_none());

    let response = app
        .clone()
        .oneshot(rpc_request_with(
            json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
            &[("mcp-session-id", &session)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["tools"][0]["name"], "echo");

    // No auth configured: the well-known document is absent.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/.well-known/oauth-protected-resource")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tools_call_round_trips() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);
    let (session, _) = initialize(&app).await;

    let response = app
        .clone()
        .oneshot(rpc_request_with(
            json!({
                "jsonrpc": "2.0",
                "method": "tools/call",
                "params": {"name": "echo", "arguments": {"x": 7}},
                "id": 3
            }),
            &[("mcp-session-id", &session)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["content"][0]["type"], "text");
    assert_eq!(body["result"]["content"][0]["text"], r#"{"x":7}"#);
}

#[tokio::test]
async fn stale_session_is_404_with_32001() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(rpc_request_with(
            json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1}),
            &[("mcp-session-id", "deadbeefdeadbeefdeadbeefdeadbeef")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32001);
}

#[tokio::test]
async fn notification_gets_202_with_empty_body() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(rpc_request(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn missing_method_is_invalid_request() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(rpc_request(json!({"jsonrpc": "2.0", "id": 1})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_method_is_32601() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(rpc_request(
            json!({"jsonrpc": "2.0", "method": "prompts/list", "id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn parse_error_is_32700_with_null_id() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn body_over_limit_is_413() {
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .max_body_bytes(Some(64))
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let oversized = json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"name": "echo", "arguments": {"blob": "x".repeat(256)}},
        "id": 1
    });
    let response = app.clone().oneshot(rpc_request(oversized)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
}

#[tokio::test]
async fn zero_body_limit_rejects_every_body() {
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .max_body_bytes(Some(0))
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(rpc_request(json!({"jsonrpc": "2.0", "method": "initialize", "id": 1})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn disabled_body_limit_accepts_large_bodies() {
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .max_body_bytes(None)
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let big = json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": {"name": "echo", "arguments": {"blob": "x".repeat(1_500_000)}},
        "id": 1
    });
    let response = app.clone().oneshot(rpc_request(big)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn content_length_precheck_rejects_without_reading() {
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .max_body_bytes(Some(64))
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header(header::CONTENT_LENGTH, "100000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn scope_denied_call_is_403_mentioning_the_scope() {
    let provider = Arc::new(
        MockAuthProvider::new("https://mcp.example.com").allow_all(AuthInfo {
            subject: "user".into(),
            client_id: None,
            scopes: vec!["read".into()],
            claims: json!({}),
            expires_at: None,
        }),
    );
    let server = McpServer::builder()
        .tool(echo_tool("admin_action").required_scopes(["admin"]))
        .auth_provider(provider)
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(rpc_request_with(
            json!({
                "jsonrpc": "2.0",
                "method": "tools/call",
                "params": {"name": "admin_action", "arguments": {}},
                "id": 1
            }),
            &[("authorization", "Bearer anything")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert!(
        body["error"]["message"].as_str().unwrap().contains("admin"),
        "403 body must list the missing scope: {body}"
    );
}

#[tokio::test]
async fn missing_bearer_is_401_with_www_authenticate() {
    let provider = Arc::new(MockAuthProvider::new("https://mcp.example.com"));
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .auth_provider(provider)
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(rpc_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {}},
            "id": 1
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let www = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(www.starts_with("Bearer "));
    assert!(www.contains("resource_metadata="));

    // tools/list is gated outside the pipeline with the same verifier.
    let response = app
        .clone()
        .oneshot(rpc_request(json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn well_known_serves_rfc9728_metadata_with_auth() {
    let provider = Arc::new(MockAuthProvider::new("https://mcp.example.com"));
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .auth_provider(provider)
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/.well-known/oauth-protected-resource")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["resource"], "https://mcp.example.com");
    assert_eq!(body["bearer_methods_supported"], json!(["header"]));
}

#[tokio::test]
async fn ip_rate_limit_rejects_second_initialize_with_retry_after() {
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .ip_rate_limit(IpRateLimitConfig::reject(RateLimitConfig {
            max_requests: 1,
            window_ms: 60_000,
        }))
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let first = app
        .clone()
        .oneshot(rpc_request(json!({"jsonrpc": "2.0", "method": "initialize", "id": 1})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(rpc_request(json!({"jsonrpc": "2.0", "method": "initialize", "id": 2})))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = second
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    // No session was created for the rejected request.
    assert!(second.headers().get("mcp-session-id").is_none());
}

#[tokio::test]
async fn initialize_budget_exhaustion_is_too_many_initialize_requests() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    for i in 0..10 {
        let response = app
            .clone()
            .oneshot(rpc_request(
                json!({"jsonrpc": "2.0", "method": "initialize", "id": i}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} should pass");
    }

    let response = app
        .clone()
        .oneshot(rpc_request(json!({"jsonrpc": "2.0", "method": "initialize", "id": 99})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["message"], "Too many initialize requests");
}

#[tokio::test]
async fn cors_reflects_allowlisted_origin_only() {
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .cors(CorsConfig {
            origins: vec!["https://app.example.com".into()],
        })
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let preflight = |origin: &str| {
        Request::builder()
            .method("OPTIONS")
            .uri("/mcp")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    };

    let allowed = app.clone().oneshot(preflight("https://app.example.com")).await.unwrap();
    assert_eq!(
        allowed
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://app.example.com")
    );

    let denied = app.clone().oneshot(preflight("https://evil.example.com")).await.unwrap();
    assert!(denied
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[tokio::test]
async fn sse_requires_event_stream_accept_header() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn sse_stream_opens_with_event_stream_content_type() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp")
                .header(header::ACCEPT, "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );
}

#[tokio::test]
async fn sse_with_unknown_session_is_404() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp")
                .header(header::ACCEPT, "text/event-stream")
                .header("mcp-session-id", "deadbeefdeadbeefdeadbeefdeadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_tears_down_the_session() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);
    let (session, _) = initialize(&app).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/mcp")
                .header("mcp-session-id", &session)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The session is gone for subsequent requests.
    let response = app
        .clone()
        .oneshot(rpc_request_with(
            json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}),
            &[("mcp-session-id", &session)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let server = plain_server();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["server"], "http-test");
    assert_eq!(body["version"], "1.2.3");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(content_type.starts_with("text/plain"));
    assert!(content_type.contains("version=0.0.4"));
}

#[tokio::test]
async fn custom_routes_are_served_alongside_mcp() {
    use axum::routing::get;

    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .route(axum::Router::new().route("/internal/status", get(|| async { "fine" })))
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/internal/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn resources_capability_advertised_when_expected() {
    let server = McpServer::builder()
        .tool(echo_tool("echo"))
        .expect_resources()
        .build()
        .unwrap();
    let app = forgemcp_server::http::router(&server);

    let (_, body) = initialize(&app).await;
    assert_eq!(body["result"]["capabilities"]["resources"], json!({}));
}
