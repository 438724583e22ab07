//! HTTP fetch tool

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::{Error, Result};

use super::traits::{Tool, ToolResult};

/// Built-in tool: fetch a URL with GET
pub struct HttpGetTool {
    client: reqwest::Client,
}

impl HttpGetTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        HttpGetTool { client }
    }
}

impl Default for HttpGetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpGetTool {
    fn name(&self) -> &str {
        "http_get"
    }

    fn description(&self) -> &str {
        "Fetch a URL with an HTTP GET request"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": { "type": "integer" },
                "body": { "type": "string" }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("Missing 'url' parameter".to_string()))?;

        // Transport failures and 5xx are transient and retried upstream;
        // 4xx is the caller's mistake and final.
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(Error::Timeout(format!(
                "Server error {} fetching {}",
                status, url
            )));
        }

        let body = response.text().await?;

        if status.is_client_error() {
            return Ok(ToolResult::failure(format!(
                "HTTP {} fetching {}: {}",
                status,
                url,
                &body[..body.len().min(200)]
            )));
        }

        Ok(ToolResult::success(serde_json::json!({
            "status": status.as_u16(),
            "body": body,
        })))
    }
}
