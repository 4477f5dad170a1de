//! Sending chat messages and checking the connection

use std::sync::Arc;

use async_trait::async_trait;
use jabber_core::Bridge;
use serde_json::Value;
use tracing::info;

use crate::{Tool, ToolOutput, ToolResult, required_str};

/// Queue a message to an address or directory alias
#[derive(Debug)]
pub struct SendMessageTool {
    bridge: Arc<Bridge>,
}

impl SendMessageTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_xmpp_message"
    }

    fn description(&self) -> &str {
        "Send a message through XMPP"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "recipient": {
                    "type": "string",
                    "description": "The JID of the message recipient or an alias to resolve from the address book"
                },
                "message": {
                    "type": "string",
                    "description": "The message text to send"
                }
            },
            "required": ["recipient", "message"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let recipient = required_str(&params, "recipient")?;
        let message = required_str(&params, "message")?;

        let address = self
            .bridge
            .send_to_recipient(recipient, message, self.bridge.enqueue_timeout())
            .await?;
        info!("Queued message to {}", address);

        let text = if address == recipient.trim() {
            format!("Message sent successfully via XMPP to {}\nContent: {}", address, message)
        } else {
            format!(
                "Message sent successfully via XMPP to {} (resolved from alias '{}')\nContent: {}",
                address, recipient, message
            )
        };
        ToolOutput::new(text).with_field("recipient", address).into()
    }
}

/// Report the connection state
#[derive(Debug)]
pub struct PingTool {
    bridge: Arc<Bridge>,
}

impl PingTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for PingTool {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Ping the XMPP connection"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value) -> ToolResult {
        let state = self.bridge.get_connection_state();
        ToolOutput::new(format!("PONG! XMPP connection status: {}", state))
            .with_field("state", state.as_str())
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolError;
    use jabber_core::{Config, ConnectionState, Directory, LoopbackConnection};

    fn bridge() -> Arc<Bridge> {
        let config = Config::default();
        let connection = Arc::new(LoopbackConnection::new("bot@x.com"));
        Arc::new(Bridge::new(&config, Arc::new(Directory::in_memory()), connection).unwrap())
    }

    #[tokio::test]
    async fn test_send_to_literal_address() {
        let bridge = bridge();
        let tool = SendMessageTool::new(bridge.clone());

        let result = tool
            .execute(serde_json::json!({"recipient": "a@x.com", "message": "hi"}))
            .await
            .unwrap();
        assert_eq!(result["recipient"], "a@x.com");
        assert!(
            result["content"][0]["text"]
                .as_str()
                .unwrap()
                .starts_with("Message sent successfully via XMPP to a@x.com\n")
        );
        assert_eq!(bridge.queue_stats().outbound_size, 1);
    }

    #[tokio::test]
    async fn test_send_resolves_alias() {
        let bridge = bridge();
        bridge.directory().save_alias("alice", "a@x.com").await.unwrap();
        let tool = SendMessageTool::new(bridge);

        let result = tool
            .execute(serde_json::json!({"recipient": "alice", "message": "hi"}))
            .await
            .unwrap();
        assert_eq!(result["recipient"], "a@x.com");
        assert!(
            result["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("(resolved from alias 'alice')")
        );
    }

    #[tokio::test]
    async fn test_send_rejects_missing_and_unknown() {
        let tool = SendMessageTool::new(bridge());

        let err = tool
            .execute(serde_json::json!({"recipient": "a@x.com"}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidParameters("Missing required parameter: message".into())
        );

        let err = tool
            .execute(serde_json::json!({"recipient": "nobody", "message": "hi"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
        assert!(err.to_string().contains("No matches found"));
    }

    #[tokio::test]
    async fn test_ping_reports_state() {
        let bridge = bridge();
        let tool = PingTool::new(bridge.clone());

        let result = tool.execute(Value::Null).await.unwrap();
        assert_eq!(
            result["content"][0]["text"],
            "PONG! XMPP connection status: disconnected"
        );

        bridge.connection_state_publisher().send_replace(ConnectionState::Connected);
        let result = tool.execute(Value::Null).await.unwrap();
        assert_eq!(result["state"], "connected");
    }
}
