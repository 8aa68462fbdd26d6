//! GET /mcp — the SSE stream.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use http::HeaderValue;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ServerError;
use crate::http::{error_to_response, AppState};
use crate::server::McpServer;
use crate::session::{SseEvent, ANONYMOUS_SESSION};
use crate::telemetry;

/// Outbound channel depth per SSE client. A peer that falls this far
/// behind is treated as dead and reaped on the next delivery.
const SSE_CHANNEL_CAPACITY: usize = 64;

const SESSION_HEADER: &str = "mcp-session-id";

/// Removes the client from the session's list when the stream is dropped,
/// which is how peer disconnects reach the registry.
struct ClientGuard {
    server: McpServer,
    session_key: String,
    client_id: u64,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.server
            .inner
            .sse
            .remove(&self.session_key, self.client_id);
        telemetry::set_sse_clients_active(self.server.inner.sse.client_count());
        debug!(
            session = %self.session_key,
            client = self.client_id,
            "SSE client disconnected"
        );
    }
}

/// GET /mcp — server→client event stream.
pub(crate) async fn get_mcp(State(state): State<AppState>, request: Request) -> Response {
    let server = &state.server;
    let headers = request.headers();

    let accepts_sse = headers
        .get(http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));
    if !accepts_sse {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    // Same bearer gate as post-initialize methods.
    let authorization = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if let Err(err) = server.authorize_bearer(authorization).await {
        return error_to_response(&err, None);
    }

    // A supplied session id must name a live session.
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session_key = match &session_id {
        Some(id) => {
            if !server.inner.sessions.touch(id) {
                return error_to_response(&ServerError::SessionNotFound, None);
            }
            id.clone()
        }
        None => ANONYMOUS_SESSION.to_string(),
    };

    let (tx, mut rx) = mpsc::channel::<SseEvent>(SSE_CHANNEL_CAPACITY);
    let client_id = server.inner.sse.register(&session_key, tx);
    telemetry::set_sse_clients_active(server.inner.sse.client_count());

    let guard = ClientGuard {
        server: server.clone(),
        session_key,
        client_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        // Comment frame flushes the response headers immediately.
        yield Ok::<Event, Infallible>(Event::default().comment("connected"));
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().id(event.id.to_string()).data(event.data));
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Some(id) = session_id {
        if let Ok(value) = HeaderValue::from_str(&id) {
            response_headers.insert(SESSION_HEADER, value);
        }
    }
    response
}
