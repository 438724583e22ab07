//! Agent module - the plan/act/observe/reflect execution loop
//!
//! One [`Agent`] drives one goal: the planner picks tool calls, the loop
//! executes them against the registry, observations accumulate in the trace,
//! and the reflector periodically reviews progress. Agents are created per
//! task through the [`AgentFactory`] seam.

mod factory;
mod loop_guard;
pub mod prompts;
mod reflector;
mod runner;

pub use factory::{AgentFactory, AgentType, DefaultAgentFactory};
pub use loop_guard::LoopGuard;
pub use reflector::Reflector;
pub use runner::{Agent, RunOutput};
