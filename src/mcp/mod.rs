//! MCP module - Model Context Protocol client and server
//!
//! Both directions of MCP live here: the SSE transport that attaches to
//! remote servers (responses correlated by the [`Dispatcher`], notifications
//! turned into agent goals by per-server handlers), the HTTP server that
//! exposes the local tool registry over JSON-RPC and REST, and the bridge
//! that registers remote tools as local ones.

mod bridge;
mod dispatcher;
mod handlers;
mod protocol;
mod server;
mod sse;

pub use bridge::McpToolBridge;
pub use dispatcher::Dispatcher;
pub use handlers::{
    goal_channel, run_goal_consumer, DefaultNotificationHandler, HandlerFactory,
    NotificationHandler,
};
pub use protocol::{
    error_codes, CallToolResult, McpContent, McpError, McpMessage, McpToolDef, JSONRPC_VERSION,
    PROTOCOL_VERSION,
};
pub use server::McpServer;
pub use sse::{ClientState, SseClient};
