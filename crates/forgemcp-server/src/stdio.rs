//! Stdio transport: line-oriented JSON-RPC on stdin/stdout.
//!
//! Dispatches to the same core operations as the HTTP transport, with
//! `request` and `session_id` left unset so the auth middleware
//! short-circuits — the local transport is trusted. Server-initiated
//! notifications are interleaved onto stdout through a channel.

use forgemcp_protocol::jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcNotification, JsonRpcResponse, RequestId,
};
use forgemcp_protocol::types::{CallToolParams, EmptyResult, ReadResourceParams};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ServerError, ServerResult};
use crate::server::McpServer;

/// Handle for pushing JSON-RPC notifications to the client.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<JsonRpcNotification>,
}

impl NotificationSender {
    /// Queue a notification for the output stream.
    pub async fn send(&self, method: &str, params: Value) -> ServerResult<()> {
        self.tx
            .send(JsonRpcNotification::new(method, Some(params)))
            .await
            .map_err(|_| ServerError::Shutdown)
    }
}

/// The stdio transport loop.
#[derive(Debug)]
pub struct StdioTransport {
    server: McpServer,
    outbound_rx: mpsc::Receiver<JsonRpcNotification>,
}

impl StdioTransport {
    /// Create the transport and its notification handle.
    pub fn new(server: McpServer) -> (Self, NotificationSender) {
        let (tx, outbound_rx) = mpsc::channel(32);
        (
            Self {
                server,
                outbound_rx,
            },
            NotificationSender { tx },
        )
    }

    /// Run on stdin/stdout until EOF or shutdown.
    pub async fn run(self) -> ServerResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run_with(stdin, stdout).await
    }

    /// Run on explicit streams. The loop ends at EOF or when the server's
    /// shutdown token cancels.
    pub async fn run_with<R, W>(mut self, mut reader: R, mut writer: W) -> ServerResult<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let shutdown = self.server.shutdown_token();
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,

                Some(notification) = self.outbound_rx.recv() => {
                    write_json(&mut writer, &notification).await?;
                }

                read = reader.read_line(&mut line) => {
                    if read? == 0 {
                        break;
                    }
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    if let Some(limit) = self.server.config().max_body_bytes {
                        if trimmed.len() > limit {
                            let response = JsonRpcResponse::error(
                                None,
                                JsonRpcError::new(
                                    JsonRpcErrorCode::ServerOverloaded,
                                    format!("Payload too large: message exceeds {limit} bytes"),
                                ),
                            );
                            write_json(&mut writer, &response).await?;
                            continue;
                        }
                    }

                    if let Some(response) = handle_line(&self.server, trimmed).await {
                        write_json(&mut writer, &response).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

async fn write_json<W, T>(writer: &mut W, value: &T) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Process one inbound line. Returns `None` for messages that get no
/// response (notifications, stray response envelopes).
async fn handle_line(server: &McpServer, line: &str) -> Option<JsonRpcResponse> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(_) => {
            return Some(JsonRpcResponse::error(
                None,
                JsonRpcError::new(JsonRpcErrorCode::ParseError, "Parse error"),
            ));
        }
    };

    // A response envelope from the client is not ours to answer.
    if value.get("method").is_none()
        && (value.get("result").is_some() || value.get("error").is_some())
    {
        debug!("Ignoring response envelope on stdio");
        return None;
    }

    let method = match value.get("method").and_then(Value::as_str) {
        Some(method) => method.to_string(),
        None => {
            return Some(JsonRpcResponse::error(
                None,
                JsonRpcError::new(JsonRpcErrorCode::InvalidRequest, "Invalid Request"),
            ));
        }
    };

    // Notifications are consumed without a response.
    if value.get("id").is_none() || value["id"].is_null() {
        debug!(method = %method, "Notification received on stdio");
        return None;
    }
    let id: RequestId = serde_json::from_value(value["id"].clone()).ok()?;
    let params = value.get("params").cloned();

    Some(dispatch(server, &method, params, id).await)
}

async fn dispatch(
    server: &McpServer,
    method: &str,
    params: Option<Value>,
    id: RequestId,
) -> JsonRpcResponse {
    let result: ServerResult<Value> = match method {
        "initialize" => serde_json::to_value(server.initialize_result()).map_err(Into::into),
        "ping" => serde_json::to_value(EmptyResult::default()).map_err(Into::into),
        "tools/list" => serde_json::to_value(server.list_tools()).map_err(Into::into),
        "tools/call" => match params.map(serde_json::from_value::<CallToolParams>).transpose() {
            Ok(Some(call)) => {
                let args = call.arguments.unwrap_or_else(|| json!({}));
                // request and session stay unset: local transport.
                match server.call_tool(&call.name, args, None, None).await {
                    Ok(result) => serde_json::to_value(result).map_err(Into::into),
                    Err(err) => Err(err),
                }
            }
            _ => Err(ServerError::Validation {
                message: "Invalid params: expected {name, arguments}".to_string(),
            }),
        },
        "resources/list" => serde_json::to_value(server.list_resources()).map_err(Into::into),
        "resources/read" => {
            match params.map(serde_json::from_value::<ReadResourceParams>).transpose() {
                Ok(Some(read)) => match server.read_resource(&read.uri).await {
                    Ok(result) => serde_json::to_value(result).map_err(Into::into),
                    Err(err) => Err(err),
                },
                _ => Err(ServerError::Validation {
                    message: "Invalid params: expected {uri}".to_string(),
                }),
            }
        }
        other => {
            return JsonRpcResponse::error(
                Some(id),
                JsonRpcError::new(
                    JsonRpcErrorCode::MethodNotFound,
                    format!("Method not found: {other}"),
                ),
            );
        }
    };

    match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(err) => JsonRpcResponse::error(Some(id), err.to_json_rpc()),
    }
}
