//! JSON-RPC POST dispatch and auxiliary endpoints.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use forgemcp_auth::{AuthError, AuthErrorCode};
use forgemcp_protocol::jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcResponse, RequestId,
};
use forgemcp_protocol::types::{CallToolParams, EmptyResult, ReadResourceParams};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::debug;

use crate::config::HttpRequestMeta;
use crate::context::RequestInfo;
use crate::error::{ServerError, ServerResult};
use crate::http::{client_ip, AppState};
use crate::middleware::RateLimitMode;
use crate::server::McpServer;
use crate::telemetry;

const SESSION_HEADER: &str = "mcp-session-id";

fn json_body(value: &impl serde::Serialize) -> Body {
    Body::from(serde_json::to_vec(value).unwrap_or_default())
}

fn rpc_response(status: StatusCode, response: &JsonRpcResponse) -> Response {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(json_body(response))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn rpc_error(
    status: StatusCode,
    id: Option<RequestId>,
    code: JsonRpcErrorCode,
    message: impl Into<String>,
) -> Response {
    rpc_response(
        status,
        &JsonRpcResponse::error(id, JsonRpcError::new(code, message)),
    )
}

fn rpc_success(id: RequestId, result: &impl serde::Serialize) -> ServerResult<Response> {
    let response = JsonRpcResponse::success(id, serde_json::to_value(result)?);
    Ok(rpc_response(StatusCode::OK, &response))
}

/// Escape `"` and `\` for a quoted WWW-Authenticate parameter value.
fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn www_authenticate(err: &AuthError) -> String {
    let mut params = Vec::new();
    if let Some(url) = &err.resource_metadata_url {
        params.push(format!(r#"resource_metadata="{}""#, quote_escape(url)));
    }
    if err.code == AuthErrorCode::InvalidToken {
        params.push(r#"error="invalid_token""#.to_string());
        params.push(format!(
            r#"error_description="{}""#,
            quote_escape("The access token is invalid or expired")
        ));
    }
    format!("Bearer {}", params.join(", "))
}

/// Translate a typed error into an HTTP response carrying a JSON-RPC
/// error body. This is the whole propagation table of the error design.
pub(crate) fn error_to_response(err: &ServerError, id: Option<RequestId>) -> Response {
    let body = JsonRpcResponse::error(id, err.to_json_rpc());
    match err {
        ServerError::Auth(auth) => {
            let status = match auth.code {
                AuthErrorCode::MissingToken | AuthErrorCode::InvalidToken => {
                    StatusCode::UNAUTHORIZED
                }
                AuthErrorCode::InsufficientScope => StatusCode::FORBIDDEN,
            };
            let mut response = rpc_response(status, &body);
            if status == StatusCode::UNAUTHORIZED {
                if let Ok(value) = HeaderValue::from_str(&www_authenticate(auth)) {
                    response
                        .headers_mut()
                        .insert(http::header::WWW_AUTHENTICATE, value);
                }
            }
            response
        }
        ServerError::RateLimited { retry_after_ms, .. } => {
            let mut response = rpc_response(StatusCode::TOO_MANY_REQUESTS, &body);
            let seconds = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(http::header::RETRY_AFTER, value);
            }
            response
        }
        ServerError::PayloadTooLarge { .. } => {
            rpc_response(StatusCode::PAYLOAD_TOO_LARGE, &body)
        }
        ServerError::SessionNotFound => rpc_response(StatusCode::NOT_FOUND, &body),
        ServerError::SessionExhaustion => rpc_response(StatusCode::SERVICE_UNAVAILABLE, &body),
        // Everything else — capacity rejects, validation, unknown tools,
        // handler failures — is an error in a 200 body.
        _ => rpc_response(StatusCode::OK, &body),
    }
}

/// Enforce the IP rate limit, if configured. Returns the 429 response on
/// refusal.
async fn check_ip_limit(server: &McpServer, parts: &Parts, ip: &str) -> Option<Response> {
    let (config, limiter) = server.inner.ip_rate_limit.as_ref()?;

    let key = match &config.key_fn {
        Some(key_fn) => key_fn(&HttpRequestMeta {
            ip: ip.to_string(),
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            headers: parts.headers.clone(),
            session_id: parts
                .headers
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }),
        None => ip.to_string(),
    };

    let refused = match config.mode {
        RateLimitMode::Reject => !limiter.check_limit(&key),
        RateLimitMode::Wait => tokio::time::timeout(
            config.wait_timeout,
            limiter.wait_for_slot(&key),
        )
        .await
        .is_err(),
    };
    if !refused {
        return None;
    }

    telemetry::record_rate_limited("ip");
    let retry_after_ms = limiter.time_until_slot(&key).max(1);
    let err = ServerError::RateLimited {
        message: format!(
            "Rate limit exceeded. Retry after {}s",
            retry_after_ms.div_ceil(1000).max(1)
        ),
        retry_after_ms,
    };
    Some(error_to_response(&err, None))
}

/// Read the request body under the double limit: a `Content-Length`
/// larger than the cap fails before reading; while streaming, the read
/// fails as soon as the accumulated size exceeds the cap.
async fn read_body(
    body: Body,
    headers: &HeaderMap,
    limit: Option<usize>,
) -> Result<Bytes, Response> {
    let Some(limit) = limit else {
        return axum::body::to_bytes(body, usize::MAX).await.map_err(|_| {
            rpc_error(
                StatusCode::BAD_REQUEST,
                None,
                JsonRpcErrorCode::ParseError,
                "Failed to read request body",
            )
        });
    };

    if let Some(declared) = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if declared > limit {
            let err = ServerError::PayloadTooLarge {
                size: declared,
                limit,
            };
            return Err(error_to_response(&err, None));
        }
    }

    axum::body::to_bytes(body, limit).await.map_err(|_| {
        let err = ServerError::PayloadTooLarge {
            size: limit.saturating_add(1),
            limit,
        };
        error_to_response(&err, None)
    })
}

/// POST /mcp — JSON-RPC requests, notifications, and correlated responses
/// to server-initiated requests.
pub(crate) async fn post_mcp(State(state): State<AppState>, request: Request) -> Response {
    let server = &state.server;
    let (parts, body) = request.into_parts();
    let ip = client_ip(&parts.headers);

    if let Some(response) = check_ip_limit(server, &parts, &ip).await {
        return response;
    }

    let bytes = match read_body(body, &parts.headers, server.config().max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };

    let Ok(value) = serde_json::from_slice::<Value>(&bytes) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            JsonRpcErrorCode::ParseError,
            "Parse error",
        );
    };

    // A response envelope completes a pending server-initiated request.
    if value.get("method").is_none()
        && (value.get("result").is_some() || value.get("error").is_some())
    {
        resolve_pending(server, &value);
        return StatusCode::ACCEPTED.into_response();
    }

    let Some(method) = value.get("method").and_then(Value::as_str).map(str::to_string) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            JsonRpcErrorCode::InvalidRequest,
            "Invalid Request",
        );
    };

    // Notifications get no response body.
    if value.get("id").is_none() || value["id"].is_null() {
        debug!(method = %method, "Notification received");
        return StatusCode::ACCEPTED.into_response();
    }
    let Ok(id) = serde_json::from_value::<RequestId>(value["id"].clone()) else {
        return rpc_error(
            StatusCode::BAD_REQUEST,
            None,
            JsonRpcErrorCode::InvalidRequest,
            "Invalid Request",
        );
    };
    let params = value.get("params").cloned();

    let started = Instant::now();
    let response = dispatch(server, &parts.headers, &ip, &method, params, id).await;
    telemetry::record_request(
        &method,
        if response.status().is_success() { "success" } else { "error" },
        started.elapsed().as_secs_f64(),
    );
    response
}

fn resolve_pending(server: &McpServer, value: &Value) {
    let Some(id) = value.get("id") else { return };
    let request_id = match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let result = if let Some(error) = value.get("error") {
        Err(ServerError::internal(
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("client returned an error")
                .to_string(),
        ))
    } else {
        Ok(value.get("result").cloned().unwrap_or(Value::Null))
    };
    server.inner.sampling.resolve(&request_id, result);
}

async fn dispatch(
    server: &McpServer,
    headers: &HeaderMap,
    ip: &str,
    method: &str,
    params: Option<Value>,
    id: RequestId,
) -> Response {
    if method == "initialize" {
        return handle_initialize(server, ip, id);
    }

    // Every other method runs inside an (optional) session.
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(session) = &session_id {
        if !server.inner.sessions.touch(session) {
            return error_to_response(&ServerError::SessionNotFound, Some(id));
        }
    }

    match method {
        "ping" => rpc_success(id, &EmptyResult::default())
            .unwrap_or_else(|e| error_to_response(&e, None)),

        "tools/call" => {
            let call: CallToolParams = match params.map(serde_json::from_value).transpose() {
                Ok(Some(call)) => call,
                _ => {
                    return rpc_error(
                        StatusCode::OK,
                        Some(id),
                        JsonRpcErrorCode::InvalidParams,
                        "Invalid params: expected {name, arguments}",
                    );
                }
            };
            let request_info = RequestInfo {
                headers: headers.clone(),
                client_ip: ip.to_string(),
            };
            let args = call.arguments.unwrap_or_else(|| json!({}));
            match server
                .call_tool(&call.name, args, Some(request_info), session_id)
                .await
            {
                Ok(result) => {
                    rpc_success(id, &result).unwrap_or_else(|e| error_to_response(&e, None))
                }
                Err(err) => error_to_response(&err, Some(id)),
            }
        }

        // Gated outside the pipeline with the same bearer verifier.
        "tools/list" => match server.authorize_bearer(auth_header(headers)).await {
            Ok(_) => rpc_success(id, &server.list_tools())
                .unwrap_or_else(|e| error_to_response(&e, None)),
            Err(err) => error_to_response(&err, Some(id)),
        },

        "resources/list" => match server.authorize_bearer(auth_header(headers)).await {
            Ok(_) => rpc_success(id, &server.list_resources())
                .unwrap_or_else(|e| error_to_response(&e, None)),
            Err(err) => error_to_response(&err, Some(id)),
        },

        "resources/read" => {
            if let Err(err) = server.authorize_bearer(auth_header(headers)).await {
                return error_to_response(&err, Some(id));
            }
            let read: ReadResourceParams = match params.map(serde_json::from_value).transpose() {
                Ok(Some(read)) => read,
                _ => {
                    return rpc_error(
                        StatusCode::OK,
                        Some(id),
                        JsonRpcErrorCode::InvalidParams,
                        "Invalid params: expected {uri}",
                    );
                }
            };
            match server.read_resource(&read.uri).await {
                Ok(result) => {
                    rpc_success(id, &result).unwrap_or_else(|e| error_to_response(&e, None))
                }
                Err(err) => error_to_response(&err, Some(id)),
            }
        }

        other => rpc_error(
            StatusCode::OK,
            Some(id),
            JsonRpcErrorCode::MethodNotFound,
            format!("Method not found: {other}"),
        ),
    }
}

fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

fn handle_initialize(server: &McpServer, ip: &str, id: RequestId) -> Response {
    // Dedicated per-IP budget, independent of the general IP limiter.
    if !server.inner.init_limiter.check_limit(ip) {
        telemetry::record_rate_limited("initialize");
        let retry_after_ms = server.inner.init_limiter.time_until_slot(ip).max(1);
        let mut response = rpc_error(
            StatusCode::TOO_MANY_REQUESTS,
            Some(id),
            JsonRpcErrorCode::ServerOverloaded,
            "Too many initialize requests",
        );
        let seconds = retry_after_ms.div_ceil(1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
            response.headers_mut().insert(http::header::RETRY_AFTER, value);
        }
        return response;
    }

    match server.inner.sessions.create() {
        Ok(session_id) => {
            telemetry::set_sessions_active(server.inner.sessions.len());
            let mut response = rpc_success(id, &server.initialize_result())
                .unwrap_or_else(|e| error_to_response(&e, None));
            if let Ok(value) = HeaderValue::from_str(&session_id) {
                response.headers_mut().insert("mcp-session-id", value);
            }
            response
        }
        Err(err) => error_to_response(&err, Some(id)),
    }
}

/// DELETE /mcp — explicit session teardown.
pub(crate) async fn delete_mcp(State(state): State<AppState>, request: Request) -> Response {
    let server = &state.server;
    let Some(session_id) = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if server.inner.sessions.remove(session_id) {
        server.inner.sse.close_session(session_id);
        telemetry::set_sessions_active(server.inner.sessions.len());
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_to_response(&ServerError::SessionNotFound, None)
    }
}

/// GET /health.
pub(crate) async fn health(State(state): State<AppState>) -> Response {
    let config = state.server.config();
    Json(json!({
        "status": "ok",
        "server": config.name,
        "version": config.version,
    }))
    .into_response()
}

/// GET /metrics — Prometheus text exposition 0.0.4.
pub(crate) async fn metrics() -> Response {
    let body = telemetry::prometheus_handle().render();
    Response::builder()
        .status(StatusCode::OK)
        .header(
            http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// GET /.well-known/oauth-protected-resource — RFC 9728 metadata, 404
/// when no auth provider is configured.
pub(crate) async fn protected_resource_metadata(State(state): State<AppState>) -> Response {
    match state.server.auth_provider() {
        Some(provider) => Json(provider.resource_metadata()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn www_authenticate_escapes_quotes_and_backslashes() {
        let err = AuthError::invalid_token(Some(r#"https://x/"a\b""#.to_string()));
        let header = www_authenticate(&err);
        assert!(header.starts_with("Bearer resource_metadata=\""));
        assert!(header.contains(r#"\"a\\b\""#));
        assert!(header.contains(r#"error="invalid_token""#));
    }

    #[test]
    fn missing_token_header_has_no_error_param() {
        let err = AuthError::missing_token(Some("https://x/meta".to_string()));
        let header = www_authenticate(&err);
        assert!(!header.contains("error="));
    }
}
