//! Server-initiated requests over SSE.
//!
//! A sampling-style request flows out to the client on its SSE stream and
//! the response comes back as an HTTP POST carrying a JSON-RPC response
//! envelope. This module correlates the two with a pending-resolver map,
//! applies a per-request timeout, and rejects everything pending at
//! shutdown.

use forgemcp_protocol::jsonrpc::{JsonRpcRequest, RequestId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::session::SseRegistry;

/// Default per-request timeout.
pub const SAMPLING_TIMEOUT: Duration = Duration::from_secs(60);

type Resolver = oneshot::Sender<ServerResult<Value>>;

/// Pending server→client requests awaiting correlated responses.
#[derive(Debug)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, Resolver>>,
    timeout: Duration,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new(SAMPLING_TIMEOUT)
    }
}

impl PendingRequests {
    /// Create with an explicit timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Send a request to a session's SSE clients and await the response.
    pub async fn request(
        &self,
        sse: &SseRegistry,
        session_key: &str,
        method: &str,
        params: Value,
    ) -> ServerResult<Value> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(request_id.clone(), tx);

        let request = JsonRpcRequest::new(
            method,
            Some(params),
            RequestId::String(request_id.clone()),
        );
        let frame = serde_json::to_string(&request)?;

        if sse.send_to_session(session_key, &frame) == 0 {
            self.inner.lock().remove(&request_id);
            return Err(ServerError::internal(format!(
                "no SSE clients connected for session to receive {method}"
            )));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ServerError::Shutdown),
            Err(_) => {
                self.inner.lock().remove(&request_id);
                Err(ServerError::internal(format!(
                    "{method} request timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Complete a pending request from a POSTed JSON-RPC response. Returns
    /// whether the id matched anything pending.
    pub fn resolve(&self, request_id: &str, result: ServerResult<Value>) -> bool {
        match self.inner.lock().remove(request_id) {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => {
                debug!(request_id = %request_id, "Response for unknown pending request");
                false
            }
        }
    }

    /// Reject every pending request with a shutdown error.
    pub fn cancel_all(&self) {
        let pending: Vec<Resolver> = {
            let mut inner = self.inner.lock();
            inner.drain().map(|(_, tx)| tx).collect()
        };
        for tx in pending {
            let _ = tx.send(Err(ServerError::Shutdown));
        }
    }

    /// Number of requests currently awaiting responses.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn request_resolves_with_posted_response() {
        let sse = SseRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        sse.register("s1", tx);

        let pending = PendingRequests::default();
        let fut = pending.request(&sse, "s1", "sampling/createMessage", json!({"p": 1}));
        let fut = std::pin::pin!(fut);

        // Drive the request far enough to enqueue the SSE frame.
        let mut fut = fut;
        tokio::select! {
            _ = &mut fut => panic!("should not resolve yet"),
            frame = rx.recv() => {
                let frame = frame.unwrap();
                let value: Value = serde_json::from_str(&frame.data).unwrap();
                assert_eq!(value["method"], "sampling/createMessage");
                let id = value["id"].as_str().unwrap().to_string();
                assert!(pending.resolve(&id, Ok(json!({"answer": "ok"}))));
            }
        }

        let result = fut.await.unwrap();
        assert_eq!(result["answer"], "ok");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn request_fails_without_sse_clients() {
        let sse = SseRegistry::new();
        let pending = PendingRequests::default();
        let err = pending
            .request(&sse, "nobody", "roots/list", json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no SSE clients"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn timeout_cleans_up_the_pending_entry() {
        let sse = SseRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        sse.register("s1", tx);

        let pending = PendingRequests::new(Duration::from_millis(20));
        let err = pending
            .request(&sse, "s1", "ping", json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_rejects_pending_with_shutdown() {
        let sse = SseRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        sse.register("s1", tx);

        let pending = std::sync::Arc::new(PendingRequests::default());
        let p2 = std::sync::Arc::clone(&pending);
        let sse = std::sync::Arc::new(sse);
        let sse2 = std::sync::Arc::clone(&sse);
        let task = tokio::spawn(async move {
            p2.request(&sse2, "s1", "elicitation/create", json!({})).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pending.len(), 1);
        pending.cancel_all();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, ServerError::Shutdown));
    }

    #[tokio::test]
    async fn resolving_unknown_id_is_a_no_op() {
        let pending = PendingRequests::default();
        assert!(!pending.resolve("nope", Ok(json!(null))));
    }
}
