//! Tools module - the capability registry and built-in tools
//!
//! A [`Tool`] is a named, schema-typed capability with side effects. The
//! [`ToolRegistry`] maps names to tool instances; it is populated once at
//! startup and shared read-only for the lifetime of the process.

mod fs;
mod http;
mod registry;
mod traits;

pub use fs::{FsReadTool, FsWriteTool};
pub use http::HttpGetTool;
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolCall, ToolManifestEntry, ToolResult};
