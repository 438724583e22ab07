//! Core tool trait and result types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::llm::{FunctionDefinition, ToolDefinition};

/// A tool that can be called by the LLM
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON Schema for tool input
    fn input_schema(&self) -> Value;

    /// Get the JSON Schema for tool output
    fn output_schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Execute the tool with given arguments.
    ///
    /// Transport-level problems (timeouts, connection resets) surface as
    /// retryable `Err` values; domain failures come back as
    /// `Ok(ToolResult::failure(..))` and are final.
    async fn execute(&self, args: Value) -> Result<ToolResult>;

    /// Convert to a function-calling tool definition
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.input_schema(),
            },
        }
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution was successful
    pub success: bool,
    /// Output mapping (for successful execution)
    pub output: Option<Value>,
    /// Error message (for failed execution)
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: Value) -> Self {
        ToolResult {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// A tool call request from the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Tool arguments as JSON
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        ToolCall {
            name: name.into(),
            arguments,
        }
    }
}

/// Manifest entry describing a registered tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifestEntry {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
}
