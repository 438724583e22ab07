//! Tool registry - manages available tools for agents
//!
//! The registry is populated during startup and then shared read-only behind
//! an `Arc`, so concurrent reads need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::ToolDefinition;

use super::traits::{Tool, ToolCall, ToolManifestEntry, ToolResult};

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        ToolRegistry {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register an already shared tool. Fails if the name is already taken.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Tool '{}' is already registered",
                name
            )));
        }
        debug!("Registered tool: {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List tool names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the manifest of all registered tools
    pub fn manifest(&self) -> Vec<ToolManifestEntry> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| ToolManifestEntry {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect()
    }

    /// Get all function-calling tool definitions
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| tool.to_definition())
            .collect()
    }

    /// Execute a tool call
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        match self.get(&call.name) {
            Some(tool) => tool.execute(call.arguments.clone()).await,
            None => Err(Error::ToolNotFound(call.name.clone())),
        }
    }

    /// Get tool count
    pub fn count(&self) -> usize {
        self.tools.len()
    }
}
