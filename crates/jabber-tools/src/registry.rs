//! Tool registration, listing, and dispatch

use std::collections::HashMap;
use std::sync::Arc;

use jabber_core::Bridge;
use serde_json::Value;
use tracing::debug;

use crate::{
    AddressBookQueryTool, AddressBookSaveTool, InboxClearTool, InboxGetTool, InboxListTool,
    InboxStatsTool, PingTool, SendMessageTool, Tool, ToolError, ToolResult,
};

/// Named tools in registration order
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    /// `tools/list` entries, rebuilt on every change
    schemas: Vec<Value>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every bridge-backed tool
    pub fn with_bridge_tools(bridge: Arc<Bridge>) -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(SendMessageTool::new(bridge.clone())),
            Arc::new(PingTool::new(bridge.clone())),
            Arc::new(InboxListTool::new(bridge.clone())),
            Arc::new(InboxGetTool::new(bridge.clone())),
            Arc::new(InboxClearTool::new(bridge.clone())),
            Arc::new(InboxStatsTool::new(bridge.clone())),
            Arc::new(AddressBookQueryTool::new(bridge.clone())),
            Arc::new(AddressBookSaveTool::new(bridge)),
        ];
        let mut registry = Self::new();
        registry.register_many(tools);
        registry
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!("Registering tool: {}", name);
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
        self.refresh_schemas();
    }

    pub fn register_many(&mut self, tools: Vec<Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Entries for a `tools/list` response
    pub fn schemas(&self) -> &[Value] {
        &self.schemas
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, params: Value) -> ToolResult {
        debug!("Executing tool: {} with params: {}", name, params);

        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        tool.execute(params).await
    }

    fn refresh_schemas(&mut self) {
        self.schemas = self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect();
    }
}
