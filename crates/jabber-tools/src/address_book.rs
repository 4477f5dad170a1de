//! Directory search and alias storage

use std::sync::Arc;

use async_trait::async_trait;
use jabber_core::Bridge;
use serde_json::Value;
use tracing::info;

use crate::{Tool, ToolError, ToolOutput, ToolResult, required_str};

/// Fuzzy search by alias or address
#[derive(Debug)]
pub struct AddressBookQueryTool {
    bridge: Arc<Bridge>,
}

impl AddressBookQueryTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for AddressBookQueryTool {
    fn name(&self) -> &str {
        "address_book/query"
    }

    fn description(&self) -> &str {
        "fuzzy-search by name or JID and return matches."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let query = required_str(&params, "query")?;
        let matches = self.bridge.query_directory(query).await;

        let encoded = serde_json::to_value(&matches)
            .map_err(|e| ToolError::Execution(format!("Failed to encode matches: {}", e)))?;
        ToolOutput::new(format!("Found {} matches for query '{}'", matches.len(), query))
            .with_field("matches", encoded)
            .into()
    }
}

/// Store an alias to address mapping
#[derive(Debug)]
pub struct AddressBookSaveTool {
    bridge: Arc<Bridge>,
}

impl AddressBookSaveTool {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for AddressBookSaveTool {
    fn name(&self) -> &str {
        "address_book/save"
    }

    fn description(&self) -> &str {
        "store an alias→JID mapping."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "alias": {"type": "string"},
                "jid": {"type": "string"}
            },
            "required": ["alias", "jid"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let alias = required_str(&params, "alias")?;
        let jid = required_str(&params, "jid")?;

        let changed = self.bridge.save_directory_alias(alias, jid).await?;
        let status = if changed { "updated" } else { "no change" };
        info!("Address book entry {}: {} -> {}", status, alias, jid);

        ToolOutput::new(format!("Address book entry {}: {} -> {}", status, alias, jid))
            .with_field("status", format!("Entry {}", status))
            .with_field("alias", alias)
            .with_field("jid", jid)
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jabber_core::{Config, Directory, LoopbackConnection};
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn bridge_with(directory: Directory) -> Arc<Bridge> {
        let config = Config::default();
        let connection = Arc::new(LoopbackConnection::new("bot@x.com"));
        Arc::new(Bridge::new(&config, Arc::new(directory), connection).unwrap())
    }

    #[tokio::test]
    async fn test_save_persists_and_reports_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("address_book.json");
        let tool = AddressBookSaveTool::new(bridge_with(Directory::new(&path)));

        let params = serde_json::json!({"alias": "alice", "jid": "a@x.com"});
        let first = assert_ok!(tool.execute(params.clone()).await);
        assert_eq!(first["status"], "Entry updated");
        assert_eq!(
            first["content"][0]["text"],
            "Address book entry updated: alice -> a@x.com"
        );

        let second = assert_ok!(tool.execute(params).await);
        assert_eq!(second["status"], "Entry no change");

        let reloaded = Directory::new(&path);
        assert_eq!(assert_ok!(reloaded.load().await), 1);
    }

    #[tokio::test]
    async fn test_save_rejects_bad_input() {
        let tool = AddressBookSaveTool::new(bridge_with(Directory::in_memory()));

        let err = assert_err!(tool.execute(serde_json::json!({"alias": "alice"})).await);
        assert_eq!(
            err,
            ToolError::InvalidParameters("Missing required parameter: jid".into())
        );

        let err = assert_err!(
            tool.execute(serde_json::json!({"alias": "bad alias!", "jid": "a@x.com"}))
                .await
        );
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn test_query_returns_matches() {
        let directory = Directory::in_memory();
        directory.save_alias("alice", "a@x.com").await.unwrap();
        directory.save_alias("bob", "b@x.com").await.unwrap();
        let tool = AddressBookQueryTool::new(bridge_with(directory));

        let result = assert_ok!(tool.execute(serde_json::json!({"query": "ali"})).await);
        assert_eq!(result["content"][0]["text"], "Found 1 matches for query 'ali'");
        assert_eq!(
            result["matches"],
            serde_json::json!([{"alias": "alice", "jid": "a@x.com", "score": 100}])
        );

        assert_err!(tool.execute(serde_json::json!({"query": ""})).await);
    }
}
