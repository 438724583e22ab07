//! MCP wire protocol types
//!
//! Based on the Model Context Protocol specification (JSON-RPC 2.0). One
//! unified message struct covers requests, responses, and notifications;
//! classification looks at which fields are present.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version string
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// A JSON-RPC 2.0 message: request, response, or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpMessage {
    /// Create a request
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        McpMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::String(id.into())),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Create a notification
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        McpMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Create a success response
    pub fn response(id: Option<Value>, result: Value) -> Self {
        McpMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error_response(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        McpMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// A request carries an id and a method
    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    /// A response carries an id and a result or error, but no method
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// A notification carries a method but no id
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    /// Canonical string form of the id, used as the dispatcher key
    pub fn id_key(&self) -> Option<String> {
        self.id.as_ref().map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// Tool definition as exchanged over MCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(default)]
    pub description: String,
    /// Input schema (JSON Schema)
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Content block returned by a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

impl McpContent {
    /// A text content block
    pub fn text(text: impl Into<String>) -> Self {
        McpContent {
            content_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of a `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// A successful text result
    pub fn text(text: impl Into<String>) -> Self {
        CallToolResult {
            content: vec![McpContent::text(text)],
            is_error: false,
        }
    }

    /// An error result: the error text is the content
    pub fn error(text: impl Into<String>) -> Self {
        CallToolResult {
            content: vec![McpContent::text(text)],
            is_error: true,
        }
    }

    /// Concatenated text of all content blocks
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_request() {
        let msg = McpMessage::request("x-1", "tools/list", None);
        assert!(msg.is_request());
        assert!(!msg.is_response());
        assert!(!msg.is_notification());
        assert_eq!(msg.id_key().as_deref(), Some("x-1"));
    }

    #[test]
    fn classify_response() {
        let msg = McpMessage::response(
            Some(Value::String("x-1".into())),
            serde_json::json!({ "tools": [] }),
        );
        assert!(msg.is_response());
        assert!(!msg.is_request());
    }

    #[test]
    fn classify_error_response() {
        let msg = McpMessage::error_response(
            Some(Value::String("x-1".into())),
            error_codes::METHOD_NOT_FOUND,
            "no such method",
        );
        assert!(msg.is_response());
        assert_eq!(msg.error.as_ref().unwrap().code, -32601);
    }

    #[test]
    fn classify_notification() {
        let msg = McpMessage::notification("ping", None);
        assert!(msg.is_notification());
        assert!(!msg.is_request());
        assert!(!msg.is_response());
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#;
        let msg: McpMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.id_key().as_deref(), Some("7"));
    }

    #[test]
    fn request_serialization_omits_empty_fields() {
        let msg = McpMessage::request("a", "initialize", None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(!json.contains("result"));
        assert!(!json.contains("error"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn tool_def_defaults_schema() {
        let raw = r#"{ "name": "ping" }"#;
        let def: McpToolDef = serde_json::from_str(raw).unwrap();
        assert_eq!(def.name, "ping");
        assert_eq!(def.input_schema["type"], "object");
    }

    #[test]
    fn call_tool_result_wire_shape() {
        let result = CallToolResult::error("boom");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"isError\":true"));
        assert!(json.contains("\"type\":\"text\""));

        let parsed: CallToolResult =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"ok"}]}"#).unwrap();
        assert!(!parsed.is_error);
        assert_eq!(parsed.joined_text(), "ok");
    }
}
