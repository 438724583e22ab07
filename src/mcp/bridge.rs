//! MCP-to-Tool bridge
//!
//! Adapts a remote MCP server's tools into the local `Tool` trait so they
//! register in the `ToolRegistry` alongside built-in tools.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::tools::{Tool, ToolResult};

use super::protocol::McpToolDef;
use super::sse::SseClient;

/// Bridge that wraps one remote MCP tool as a local Tool
pub struct McpToolBridge {
    /// The SSE client owning the connection
    client: Arc<SseClient>,
    /// The remote tool definition
    tool: McpToolDef,
}

impl McpToolBridge {
    /// Create a bridge for a specific remote tool
    pub fn new(client: Arc<SseClient>, tool: McpToolDef) -> Self {
        McpToolBridge { client, tool }
    }

    /// Create bridges for every tool the server advertises
    pub async fn from_client(client: Arc<SseClient>) -> Result<Vec<Self>> {
        let tools = client.list_tools().await?;
        Ok(tools
            .into_iter()
            .map(|tool| McpToolBridge::new(Arc::clone(&client), tool))
            .collect())
    }
}

#[async_trait]
impl Tool for McpToolBridge {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn input_schema(&self) -> Value {
        self.tool.input_schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        match self.client.call_tool(&self.tool.name, args).await {
            Ok(result) => {
                let text = result.joined_text();
                if result.is_error {
                    Ok(ToolResult::failure(text))
                } else {
                    Ok(ToolResult::success(serde_json::json!({ "content": text })))
                }
            }
            Err(e) => Ok(ToolResult::failure(format!(
                "MCP tool '{}' failed: {}",
                self.tool.name, e
            ))),
        }
    }
}
