//! HTTP transport: JSON-RPC dispatch, session lifecycle and SSE fan-out.
//!
//! One endpoint (`/mcp`, with `/` as an alias) serves POSTed JSON-RPC and
//! GET SSE streams, next to `/health`, `/metrics` and the RFC 9728
//! well-known document. Operator routes are merged ahead of the built-ins.

mod handlers;
mod sse;

pub(crate) use handlers::error_to_response;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use http::HeaderMap;
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::CorsConfig;
use crate::error::ServerResult;
use crate::server::McpServer;
use crate::telemetry;

/// Shared state for the axum handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) server: McpServer,
}

/// Resolve the client IP: first non-empty of `X-Forwarded-For` (leftmost
/// entry), `X-Real-IP`, `CF-Connecting-IP`; otherwise `"unknown"`.
pub(crate) fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let single = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    forwarded
        .or_else(|| single("x-real-ip"))
        .or_else(|| single("cf-connecting-ip"))
        .unwrap_or("unknown")
        .to_string()
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("mcp-session-id"),
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([HeaderName::from_static("mcp-session-id")]);

    if config.origins.is_empty() {
        warn!("CORS allowing any origin");
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Build the HTTP router for a server. Custom routes registered on the
/// builder are merged first; path matching is exact, so the generic `/`
/// cannot shadow them.
pub fn router(server: &McpServer) -> Router {
    let state = AppState {
        server: server.clone(),
    };

    let mcp = post(handlers::post_mcp)
        .get(sse::get_mcp)
        .delete(handlers::delete_mcp);

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::protected_resource_metadata),
        )
        .route("/mcp", mcp.clone())
        .route("/", mcp)
        // Body caps are enforced by the handlers (Content-Length precheck
        // plus a streaming cap); the framework default would shadow the
        // `max_body_bytes: None` configuration.
        .layer(axum::extract::DefaultBodyLimit::disable())
        .with_state(state);

    if let Some(cors) = &server.config().cors {
        app = app.layer(cors_layer(cors));
    }

    server
        .inner
        .custom_routes
        .iter()
        .cloned()
        .fold(Router::new(), |routes, custom| routes.merge(custom))
        .merge(app)
}

/// Serve the HTTP transport until shutdown.
pub async fn serve(server: &McpServer, addr: SocketAddr) -> ServerResult<()> {
    let app = router(server);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, server = %server.config().name, "HTTP transport listening");

    spawn_session_reaper(server.clone());

    let shutdown = server.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Periodic session reaper. Sessions idle past TTL + grace are removed and
/// their SSE clients closed. The task ends when the reaper token cancels
/// and never outlives the runtime, so it cannot prevent process exit.
pub(crate) fn spawn_session_reaper(server: McpServer) {
    let token = server.inner.reaper.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(server.inner.config.session.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    let removed = server.inner.sessions.reap_expired();
                    if !removed.is_empty() {
                        for session_id in &removed {
                            server.inner.sse.close_session(session_id);
                        }
                        telemetry::record_sessions_expired(removed.len());
                        info!(count = removed.len(), "Expired sessions cleaned");
                    }
                    telemetry::set_sessions_active(server.inner.sessions.len());
                    telemetry::set_sse_clients_active(server.inner.sse.client_count());
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn ip_resolution_order() {
        let map = headers(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&map), "203.0.113.7");

        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&map), "198.51.100.2");

        let map = headers(&[("cf-connecting-ip", "192.0.2.9")]);
        assert_eq!(client_ip(&map), "192.0.2.9");

        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn empty_forwarded_entries_fall_through() {
        let map = headers(&[("x-forwarded-for", " "), ("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&map), "198.51.100.2");
    }
}
