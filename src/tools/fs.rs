//! Filesystem tools
//!
//! Workspace-rooted file access for agents.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::{Error, Result};

use super::traits::{Tool, ToolResult};

fn path_arg(args: &Value) -> Result<&str> {
    args.get("path")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("Missing 'path' parameter".to_string()))
}

/// Built-in tool: read a file from the workspace
pub struct FsReadTool {
    allowed_dir: PathBuf,
}

impl FsReadTool {
    pub fn new(allowed_dir: PathBuf) -> Self {
        FsReadTool { allowed_dir }
    }
}

#[async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative to workspace)"
                }
            },
            "required": ["path"]
        })
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "File contents" },
                "bytes": { "type": "integer", "description": "Size in bytes" }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let path = path_arg(&args)?;
        let full_path = self.allowed_dir.join(path);

        // Containment check: the path must stay inside the workspace
        if !full_path.starts_with(&self.allowed_dir) {
            return Ok(ToolResult::failure("Access denied: path outside workspace"));
        }

        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => Ok(ToolResult::success(serde_json::json!({
                "content": content,
                "bytes": content.len(),
            }))),
            Err(e) => Ok(ToolResult::failure(format!("Failed to read file: {}", e))),
        }
    }
}

/// Built-in tool: write a file into the workspace
pub struct FsWriteTool {
    allowed_dir: PathBuf,
}

impl FsWriteTool {
    pub fn new(allowed_dir: PathBuf) -> Self {
        FsWriteTool { allowed_dir }
    }
}

#[async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs_write"
    }

    fn description(&self) -> &str {
        "Write content to a file"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write (relative to workspace)"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "bytes_written": { "type": "integer" }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let path = path_arg(&args)?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'content' parameter".to_string()))?;

        let full_path = self.allowed_dir.join(path);
        if !full_path.starts_with(&self.allowed_dir) {
            return Ok(ToolResult::failure("Access denied: path outside workspace"));
        }

        if let Some(parent) = full_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::failure(format!(
                    "Failed to create parent directory: {}",
                    e
                )));
            }
        }

        match tokio::fs::write(&full_path, content).await {
            Ok(()) => Ok(ToolResult::success(serde_json::json!({
                "bytes_written": content.len(),
            }))),
            Err(e) => Ok(ToolResult::failure(format!("Failed to write file: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let write = FsWriteTool::new(dir.path().to_path_buf());
        let read = FsReadTool::new(dir.path().to_path_buf());

        let result = write
            .execute(serde_json::json!({ "path": "notes/a.txt", "content": "hello" }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["bytes_written"], 5);

        let result = read
            .execute(serde_json::json!({ "path": "notes/a.txt" }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output.unwrap()["content"], "hello");
    }

    #[tokio::test]
    async fn missing_file_is_a_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let read = FsReadTool::new(dir.path().to_path_buf());
        let result = read
            .execute(serde_json::json!({ "path": "missing.txt" }))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to read file"));
    }

    #[tokio::test]
    async fn missing_path_arg_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let read = FsReadTool::new(dir.path().to_path_buf());
        let err = read.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
