//! MCP server surface
//!
//! One axum listener hosts both faces: JSON-RPC 2.0 on `POST /` (initialize,
//! tools/list, tools/call, logging/setLevel) and a REST convenience mirror
//! (`GET /tools`, `POST /tools/invoke`, `GET /health`). The `initialized`
//! flag gates nothing; it is only reported on `/health`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::tools::{ToolCall, ToolRegistry};

use super::protocol::{error_codes, CallToolResult, McpMessage, PROTOCOL_VERSION};

/// Per-call timeout for `tools/call`
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

struct ServerState {
    initialized: bool,
    log_level: String,
}

/// The MCP/REST server over a tool registry
#[derive(Clone)]
pub struct McpServer {
    tools: Arc<ToolRegistry>,
    state: Arc<RwLock<ServerState>>,
}

impl McpServer {
    /// Create a server over `tools`
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        McpServer {
            tools,
            state: Arc::new(RwLock::new(ServerState {
                initialized: false,
                log_level: "info".to_string(),
            })),
        }
    }

    /// Build the router hosting both surfaces
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", post(handle_rpc))
            .route("/tools", get(list_tools))
            .route("/tools/invoke", post(invoke_tool))
            .route("/health", get(health))
            .with_state(self.clone())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve until the process ends
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let router = self.router();
        info!("MCP server listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .await
            .map_err(|e| crate::error::Error::Internal(format!("server error: {}", e)))?;
        Ok(())
    }
}

// ---- JSON-RPC surface ----

async fn handle_rpc(State(server): State<McpServer>, body: String) -> Response {
    let message: McpMessage = match serde_json::from_str(&body) {
        Ok(message) => message,
        Err(e) => {
            return Json(McpMessage::error_response(
                None,
                error_codes::PARSE_ERROR,
                format!("parse error: {}", e),
            ))
            .into_response();
        }
    };

    if message.is_notification() {
        handle_notification(&server, &message).await;
        return StatusCode::ACCEPTED.into_response();
    }

    if !message.is_request() {
        return Json(McpMessage::error_response(
            message.id,
            error_codes::INVALID_REQUEST,
            "expected a request or notification",
        ))
        .into_response();
    }

    let id = message.id.clone();
    let method = message.method.as_deref().unwrap_or_default();
    debug!(method, "JSON-RPC request");

    let reply = match method {
        "initialize" => McpMessage::response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": crate::NAME,
                    "version": crate::VERSION,
                }
            }),
        ),
        "tools/list" => {
            let tools: Vec<Value> = server
                .tools
                .names()
                .into_iter()
                .filter_map(|name| server.tools.get(&name))
                .map(|tool| {
                    json!({
                        "name": tool.name(),
                        "description": tool.description(),
                        "inputSchema": tool.input_schema(),
                    })
                })
                .collect();
            McpMessage::response(id, json!({ "tools": tools }))
        }
        "tools/call" => handle_tools_call(&server, id, message.params).await,
        "logging/setLevel" => {
            match message
                .params
                .as_ref()
                .and_then(|params| params.get("level"))
                .and_then(|level| level.as_str())
            {
                Some(level) => {
                    server.state.write().await.log_level = level.to_string();
                    info!(level, "Log level updated");
                    McpMessage::response(id, json!({}))
                }
                None => McpMessage::error_response(
                    id,
                    error_codes::INVALID_PARAMS,
                    "missing 'level' parameter",
                ),
            }
        }
        other => McpMessage::error_response(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("unknown method: {}", other),
        ),
    };

    Json(reply).into_response()
}

async fn handle_notification(server: &McpServer, message: &McpMessage) {
    match message.method.as_deref() {
        Some("initialized") | Some("notifications/initialized") => {
            server.state.write().await.initialized = true;
            info!("MCP session initialized");
        }
        Some("ping") => {}
        Some(other) => debug!(method = other, "Ignoring notification"),
        None => {}
    }
}

async fn handle_tools_call(
    server: &McpServer,
    id: Option<Value>,
    params: Option<Value>,
) -> McpMessage {
    let params = params.unwrap_or(Value::Null);
    let Some(name) = params.get("name").and_then(|name| name.as_str()) else {
        return McpMessage::error_response(
            id,
            error_codes::INVALID_PARAMS,
            "missing 'name' parameter",
        );
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let result = match server.tools.get(name) {
        None => CallToolResult::error(format!("unknown tool: {}", name)),
        Some(tool) => match tokio::time::timeout(CALL_TIMEOUT, tool.execute(arguments)).await {
            Err(_) => {
                warn!(tool = name, "tools/call timed out");
                CallToolResult::error(format!(
                    "tool '{}' timed out after {:?}",
                    name, CALL_TIMEOUT
                ))
            }
            Ok(Err(e)) => CallToolResult::error(e.to_string()),
            Ok(Ok(result)) if result.success => CallToolResult::text(
                serde_json::to_string(&result.output.unwrap_or_else(|| json!({})))
                    .unwrap_or_default(),
            ),
            Ok(Ok(result)) => {
                CallToolResult::error(result.error.unwrap_or_else(|| "tool failed".to_string()))
            }
        },
    };

    match serde_json::to_value(&result) {
        Ok(value) => McpMessage::response(id, value),
        Err(e) => McpMessage::error_response(
            id,
            error_codes::INTERNAL_ERROR,
            format!("failed to encode result: {}", e),
        ),
    }
}

// ---- REST surface ----

async fn list_tools(State(server): State<McpServer>) -> Json<Value> {
    let tools: Vec<Value> = server
        .tools
        .names()
        .into_iter()
        .filter_map(|name| server.tools.get(&name))
        .map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "input_schema": tool.input_schema(),
                "output_schema": tool.output_schema(),
            })
        })
        .collect();
    let count = tools.len();
    Json(json!({ "tools": tools, "count": count }))
}

async fn invoke_tool(State(server): State<McpServer>, Json(body): Json<Value>) -> Response {
    let tool = body.get("tool").and_then(|tool| tool.as_str()).unwrap_or("");
    let args = body.get("args").cloned().unwrap_or_else(|| json!({}));

    if server.tools.get(tool).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown tool: {}", tool) })),
        )
            .into_response();
    }

    let call = ToolCall::new(tool, args);
    let response = match server.tools.invoke(&call).await {
        Ok(result) if result.success => json!({
            "tool": tool,
            "success": true,
            "output": result.output,
            "timestamp": Utc::now(),
        }),
        Ok(result) => json!({
            "tool": tool,
            "success": false,
            "error": result.error,
            "timestamp": Utc::now(),
        }),
        Err(e) => json!({
            "tool": tool,
            "success": false,
            "error": e.to_string(),
            "timestamp": Utc::now(),
        }),
    };
    Json(response).into_response()
}

async fn health(State(server): State<McpServer>) -> Json<Value> {
    let state = server.state.read().await;
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "initialized": state.initialized,
        "tools_count": server.tools.count(),
    }))
}
