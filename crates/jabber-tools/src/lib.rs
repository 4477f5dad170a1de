//! jabber-tools - Tools exposed to MCP clients
//!
//! Every tool wraps a shared [`Bridge`] and answers with an MCP tool result:
//! a `content` array holding one text block, plus tool-specific fields.

pub mod address_book;
pub mod inbox;
pub mod messaging;
pub mod registry;

pub use address_book::{AddressBookQueryTool, AddressBookSaveTool};
pub use inbox::{InboxClearTool, InboxGetTool, InboxListTool, InboxStatsTool};
pub use messaging::{PingTool, SendMessageTool};
pub use registry::ToolRegistry;

use async_trait::async_trait;
use jabber_core::{BridgeError, ResolveError};
use serde_json::{Map, Value};
use std::fmt::Debug;
use thiserror::Error;

/// JSON-RPC error codes used by tool failures
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Errors that can occur during tool execution
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidParameters(String),
    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    /// JSON-RPC error code for this failure
    pub fn code(&self) -> i64 {
        match self {
            Self::NotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParameters(_) => codes::INVALID_PARAMS,
            Self::Execution(_) => codes::INTERNAL_ERROR,
        }
    }
}

impl From<BridgeError> for ToolError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Validation(_) | BridgeError::BestEffortDrop { .. } => {
                Self::InvalidParameters(err.to_string())
            }
            BridgeError::Resolve(resolve) => Self::InvalidParameters(describe_resolve(&resolve)),
            other => Self::Execution(other.to_string()),
        }
    }
}

fn describe_resolve(err: &ResolveError) -> String {
    match err {
        ResolveError::NoMatch(query) => {
            format!("No matches found for alias '{}' in address book", query)
        }
        ResolveError::Ambiguous { query, candidates } => {
            let lines: Vec<String> = candidates
                .iter()
                .map(|m| format!("  {} -> {} (score: {})", m.alias, m.address, m.score))
                .collect();
            format!(
                "Ambiguous alias '{}'. Multiple matches found:\n{}\n\nPlease use the exact alias or JID.",
                query,
                lines.join("\n")
            )
        }
        ResolveError::Validation(e) => e.to_string(),
    }
}

/// Result type for tool execution
pub type ToolResult = Result<Value, ToolError>;

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `arguments` object
    fn input_schema(&self) -> Value;

    async fn execute(&self, params: Value) -> ToolResult;
}

/// Text answer plus structured fields
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub fields: Map<String, Value>,
}

impl ToolOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: Map::new(),
        }
    }

    /// Attach a structured field next to `content`
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl From<ToolOutput> for Value {
    fn from(output: ToolOutput) -> Value {
        let mut result = output.fields;
        result.insert(
            "content".to_string(),
            serde_json::json!([{ "type": "text", "text": output.text }]),
        );
        Value::Object(result)
    }
}

impl From<ToolOutput> for ToolResult {
    fn from(output: ToolOutput) -> ToolResult {
        Ok(output.into())
    }
}

/// String argument that must be present and non-empty
pub(crate) fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("Missing required parameter: {}", name)))
}
