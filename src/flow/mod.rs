//! Workflow module - multi-agent orchestration
//!
//! A [`Workflow`] is a named set of tasks plus a scheduling mode
//! (sequential, parallel, or DAG). The [`FlowEngine`] validates it, assigns
//! each ready task to a fresh agent, bounds concurrency with a shared
//! semaphore, and streams [`FlowEvent`]s to subscribers through a
//! per-execution [`EventBus`].

mod engine;
mod events;
mod types;

pub use engine::FlowEngine;
pub use events::{EventBus, EventStream, FlowEvent, FlowEventType};
pub use types::{FlowExecution, FlowStats, FlowStatus, Task, TaskStatus, Workflow, WorkflowMode};
