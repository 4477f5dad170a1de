//! Inbox tools: list, get, clear, and stats

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jabber_core::{Bridge, InboxRecord, truncate_chars};
use serde_json::Value;
use uuid::Uuid;

use crate::{Tool, ToolError, ToolOutput, ToolResult, required_str};

const PREVIEW_LENGTH: usize = 50;

fn format_timestamp(timestamp: Option<f64>) -> String {
    let Some(ts) = timestamp else {
        return "Unknown time".to_string();
    };
    let millis = (ts * 1000.0).round();
    if !millis.is_finite() {
        return ts.to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn summary(record: &InboxRecord) -> Value {
    serde_json::json!({
        "id": record.id,
        "from": record.from,
        "preview": truncate_chars(&record.body, PREVIEW_LENGTH),
        "timestamp": record.timestamp,
    })
}

/// Newest-first summaries of inbox messages
#[derive(Debug)]
pub struct InboxListTool {
    bridge: Arc<Bridge>,
}

impl InboxListTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for InboxListTool {
    fn name(&self) -> &str {
        "inbox/list"
    }

    fn description(&self) -> &str {
        "returns an ordered summary of received messages (id, from, preview, timestamp)."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of messages to return"
                }
            }
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let limit = match params.get("limit") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u64().ok_or_else(|| {
                ToolError::InvalidParameters("limit must be a non-negative integer".into())
            })? as usize),
        };
        let records = self.bridge.list_inbox(limit).await;

        let text = if records.is_empty() {
            "No messages in inbox".to_string()
        } else {
            let mut lines = vec![
                format!("Found {} messages in inbox:", records.len()),
                "=".repeat(60),
            ];
            for (i, record) in records.iter().enumerate() {
                let preview = truncate_chars(&record.body, PREVIEW_LENGTH);
                let ellipsis = if preview.len() < record.body.len() { "..." } else { "" };
                lines.push(format!("{}. From: {}", i + 1, record.from));
                lines.push(format!("   Time: {}", format_timestamp(record.timestamp)));
                lines.push(format!("   Preview: {}{}", preview, ellipsis));
                lines.push(format!("   ID: {}", record.id));
                lines.push("-".repeat(40));
            }
            lines.join("\n")
        };

        let messages: Vec<Value> = records.iter().map(summary).collect();
        ToolOutput::new(text).with_field("messages", messages).into()
    }
}

/// Full body of one inbox message
#[derive(Debug)]
pub struct InboxGetTool {
    bridge: Arc<Bridge>,
}

impl InboxGetTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for InboxGetTool {
    fn name(&self) -> &str {
        "inbox/get"
    }

    fn description(&self) -> &str {
        "returns full body for a given message id."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"messageId": {"type": "string"}},
            "required": ["messageId"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let raw = required_str(&params, "messageId")?;
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| ToolError::InvalidParameters("Message not found".into()))?;

        let record = self
            .bridge
            .get_inbox_message(id)
            .await
            .ok_or_else(|| ToolError::InvalidParameters("Message not found".into()))?;

        let message = serde_json::to_value(&record)
            .map_err(|e| ToolError::Execution(format!("Failed to encode message: {}", e)))?;
        ToolOutput::new(format!("Message from {}: {}", record.from, record.body))
            .with_field("message", message)
            .into()
    }
}

/// Remove every inbox message
#[derive(Debug)]
pub struct InboxClearTool {
    bridge: Arc<Bridge>,
}

impl InboxClearTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for InboxClearTool {
    fn name(&self) -> &str {
        "inbox/clear"
    }

    fn description(&self) -> &str {
        "empties the inbox."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value) -> ToolResult {
        let removed = self.bridge.clear_inbox().await;
        ToolOutput::new(format!("Cleared {} messages from inbox", removed))
            .with_field("status", format!("Inbox cleared - removed {} messages", removed))
            .with_field("removed", removed)
            .into()
    }
}

/// Inbox occupancy and channel sizes
#[derive(Debug)]
pub struct InboxStatsTool {
    bridge: Arc<Bridge>,
}

impl InboxStatsTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for InboxStatsTool {
    fn name(&self) -> &str {
        "inbox/stats"
    }

    fn description(&self) -> &str {
        "returns inbox occupancy and queue sizes."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _params: Value) -> ToolResult {
        let stats = self.bridge.inbox_stats().await;
        let queues = self.bridge.queue_stats();
        let to_value = |v: serde_json::Result<Value>| {
            v.map_err(|e| ToolError::Execution(format!("Failed to encode stats: {}", e)))
        };

        ToolOutput::new(format!(
            "Inbox holds {}/{} messages ({:.1}% used)",
            stats.total, stats.capacity, stats.used_percent
        ))
        .with_field("stats", to_value(serde_json::to_value(stats))?)
        .with_field("queues", to_value(serde_json::to_value(queues))?)
        .into()
    }
}
