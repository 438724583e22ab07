//! # FlowAgent
//!
//! A multi-agent workflow runtime with MCP connectivity, built with Rust.
//!
//! ## Architecture
//!
//! FlowAgent is three tightly coupled subsystems behind one crate:
//!
//! - **Agent loop** (`agent`): a Plan -> Act -> Observe -> Reflect state
//!   machine per goal, with budget enforcement, transient-error retry, a
//!   loop detector, and LLM-driven reflection
//! - **Workflow engine** (`flow`): sequential, parallel, or DAG execution of
//!   tasks over fresh agents, bounded by a shared semaphore, streaming
//!   events per execution
//! - **MCP layer** (`mcp`): an SSE/JSON-RPC client with id-correlated
//!   responses and notification-to-goal routing, plus an HTTP server
//!   exposing the local tool registry
//!
//! Supporting modules: `llm` (completion interface), `tools` (registry and
//! built-ins), `trace` (the append-only run record), `config`, and `error`.
//!
//! ## Design Principles
//!
//! 1. **Trait seams**: LLM clients, tools, agent factories, trace stores,
//!    and notification handlers are all traits, so every piece is swappable
//! 2. **Single-writer state**: task state is mutated only by the worker that
//!    owns the task; the registry and dispatcher are the only process-wide
//!    mutable stores
//! 3. **Cancellation everywhere**: one token threads from workflow execution
//!    down to every LLM call, tool invocation, and SSE read
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowagent::config::load_config;
//! use flowagent::Result;
//!
//! fn main() -> Result<()> {
//!     let config = load_config(None)?;
//!
//!     // Wire up a registry, an engine, and run workflows...
//!     let _ = config;
//!     Ok(())
//! }
//! ```

// Agent loop
pub mod agent;

// Configuration
pub mod config;

// Error types
pub mod error;

// Workflow engine and event bus
pub mod flow;

// LLM completion interface
pub mod llm;

// MCP client/server layer
pub mod mcp;

// Tool registry and built-in tools
pub mod tools;

// Agent run traces
pub mod trace;

// Re-export commonly used items
pub use error::{Error, Result};

pub use agent::{Agent, AgentFactory, DefaultAgentFactory, RunOutput};
pub use flow::{FlowEngine, FlowEvent, FlowExecution, Task, Workflow, WorkflowMode};
pub use llm::{LlmClient, OpenAiClient};
pub use tools::{Tool, ToolRegistry};
pub use trace::{Store, Trace};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
