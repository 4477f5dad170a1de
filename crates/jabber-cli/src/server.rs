//! Line-delimited JSON-RPC server over stdio
//!
//! Each input line is one message; each reply is written as one line on the
//! shared output channel, which notifications also use.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jabber_core::Bridge;
use jabber_tools::ToolRegistry;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{IncomingMessage, JsonRpcError, JsonRpcResponse};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "jabber-mcp";

/// Methods answered by the tool of the same name
const DIRECT_TOOL_METHODS: &[&str] = &[
    "inbox/list",
    "inbox/get",
    "inbox/clear",
    "inbox/stats",
    "address_book/query",
    "address_book/save",
];

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("output channel closed")]
    OutputClosed,
}

pub struct McpServer {
    tools: ToolRegistry,
    bridge: Arc<Bridge>,
}

impl McpServer {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self {
            tools: ToolRegistry::with_bridge_tools(bridge.clone()),
            bridge,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Read requests until EOF, sending every reply to `output`
    pub async fn serve<R>(&self, reader: R, output: mpsc::Sender<String>) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
    {
        info!("MCP stdio server ready");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let encoded = match serde_json::to_string(&response) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!("Failed to encode response: {}", e);
                    continue;
                }
            };
            debug!("Sending: {}", encoded);
            output
                .send(encoded)
                .await
                .map_err(|_| ServerError::OutputClosed)?;
        }
        info!("stdin closed, MCP server stopping");
        Ok(())
    }

    /// Handle one input line, returning the reply if one is due
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        debug!("Received: {}", line);

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid message format: {}", e);
                return Some(JsonRpcResponse::failure(None, JsonRpcError::parse_error(e.to_string())));
            }
        };
        let message: IncomingMessage = match value {
            Value::Object(_) => match serde_json::from_value(value) {
                Ok(message) => message,
                Err(_) => {
                    return Some(JsonRpcResponse::failure(None, JsonRpcError::invalid_request()));
                }
            },
            _ => return Some(JsonRpcResponse::failure(None, JsonRpcError::invalid_request())),
        };

        if message.is_response() {
            debug!("Ignoring response with id {:?}", message.id);
            return None;
        }
        let Some(method) = message.method.as_deref() else {
            return Some(JsonRpcResponse::failure(message.id, JsonRpcError::invalid_request()));
        };

        let outcome = self.dispatch(method, message.params.clone()).await;
        if message.is_notification() {
            if let Err(e) = outcome {
                debug!("Notification {} failed: {}", method, e.message);
            }
            return None;
        }

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(message.id, result),
            Err(error) => JsonRpcResponse::failure(message.id, error),
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.unwrap_or_else(|| Value::Object(Default::default()));
        match method {
            "initialize" => Ok(self.initialize(&params)),
            "initialized" | "notifications/initialized" => {
                info!("MCP client initialized");
                Ok(serde_json::json!({}))
            }
            "ping" => {
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or_default();
                Ok(serde_json::json!({
                    "status": "pong",
                    "timestamp": timestamp,
                    "connection": self.bridge.get_connection_state().as_str(),
                }))
            }
            "tools/list" => Ok(serde_json::json!({ "tools": self.tools.schemas() })),
            "tools/call" => self.call_tool(params).await,
            m if DIRECT_TOOL_METHODS.contains(&m) => {
                self.tools.execute(m, params).await.map_err(Into::into)
            }
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let client = params
            .pointer("/clientInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!("Initializing MCP session for client {}", client);

        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("Missing required parameter: name"))?;
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(arguments) => arguments.clone(),
        };

        info!("Calling tool: {}", name);
        self.tools.execute(name, arguments).await.map_err(Into::into)
    }
}

/// Drain `lines` into `writer`, one per line, flushing after each
pub async fn write_lines<W>(mut writer: W, mut lines: mpsc::Receiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
