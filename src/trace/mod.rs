//! Trace module - the append-only record of one agent run
//!
//! A [`Trace`] holds every step (action + observation) and reflection an
//! agent produced while pursuing a goal. The [`TraceRecorder`] enforces the
//! step bound and reflection-index validity; persistence goes through the
//! [`Store`] trait so backends stay pluggable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

/// The decision produced by one planner step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Tool name ("finish" terminates the loop)
    pub name: String,
    /// Tool arguments
    pub args: Value,
    /// The planner's stated reason for this action
    #[serde(default)]
    pub reason: String,
}

/// The outcome of executing one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Output mapping on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
    /// Wall-clock latency of the action in milliseconds
    pub latency_ms: u64,
}

impl Observation {
    /// Create a successful observation
    pub fn success(output: Value, latency_ms: u64) -> Self {
        Observation {
            output: Some(output),
            err_msg: None,
            latency_ms,
        }
    }

    /// Create a failed observation
    pub fn failure(err_msg: impl Into<String>, latency_ms: u64) -> Self {
        Observation {
            output: None,
            err_msg: Some(err_msg.into()),
            latency_ms,
        }
    }

    /// Whether this observation records a failure
    pub fn is_error(&self) -> bool {
        self.err_msg.is_some()
    }
}

/// One action/observation pair in a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// The planner's decision
    pub action: Action,
    /// What happened when it was executed
    pub observation: Observation,
    /// When the step completed
    pub timestamp: DateTime<Utc>,
}

/// Reflection decision values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionDecision {
    /// Keep going with the current approach
    Continue,
    /// Clear the planner's short-term memory and plan fresh
    Replan,
    /// Give up with the stated reason
    Stop,
}

/// The verdict of one reflection pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionResult {
    /// The model's reasoning
    pub reason: String,
    /// Confidence in the verdict, clamped to [0, 1]
    pub confidence: f64,
    /// What to do next
    pub decision: ReflectionDecision,
}

/// A reflection anchored to the step that triggered it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    /// Index of the last step reviewed
    pub step_index: usize,
    /// The verdict
    pub result: ReflectionResult,
}

/// Lifecycle status of a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TraceStatus {
    /// Whether the trace has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TraceStatus::Running)
    }
}

/// The full record of one agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Unique trace id
    pub id: String,
    /// The goal the agent pursued
    pub goal: String,
    /// Current lifecycle status
    pub status: TraceStatus,
    /// Ordered steps
    pub steps: Vec<Step>,
    /// Ordered reflections
    pub reflections: Vec<Reflection>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Append-only recorder for one agent run, bounded by `max_steps`
pub struct TraceRecorder {
    trace: Trace,
    max_steps: usize,
}

impl TraceRecorder {
    /// Start recording a run for `goal`
    pub fn new(goal: impl Into<String>, max_steps: usize) -> Self {
        let now = Utc::now();
        TraceRecorder {
            trace: Trace {
                id: Uuid::new_v4().to_string(),
                goal: goal.into(),
                status: TraceStatus::Running,
                steps: Vec::new(),
                reflections: Vec::new(),
                created_at: now,
                updated_at: now,
            },
            max_steps,
        }
    }

    /// Append a step. Fails once the step bound is reached.
    pub fn append(&mut self, step: Step) -> Result<()> {
        if self.trace.steps.len() >= self.max_steps {
            return Err(Error::BudgetExceeded(format!(
                "max steps ({}) reached",
                self.max_steps
            )));
        }
        self.trace.steps.push(step);
        self.trace.updated_at = Utc::now();
        Ok(())
    }

    /// Append a reflection. The step index must refer to an existing step.
    pub fn append_reflection(&mut self, reflection: Reflection) -> Result<()> {
        if reflection.step_index >= self.trace.steps.len() {
            return Err(Error::InvalidInput(format!(
                "reflection step_index {} out of range ({} steps)",
                reflection.step_index,
                self.trace.steps.len()
            )));
        }
        self.trace.reflections.push(reflection);
        self.trace.updated_at = Utc::now();
        Ok(())
    }

    /// Number of recorded steps
    pub fn step_count(&self) -> usize {
        self.trace.steps.len()
    }

    /// Borrow the recorded steps
    pub fn steps(&self) -> &[Step] {
        &self.trace.steps
    }

    /// Mark the run terminal
    pub fn finish(&mut self, status: TraceStatus) {
        self.trace.status = status;
        self.trace.updated_at = Utc::now();
    }

    /// Snapshot the current trace
    pub fn snapshot(&self) -> Trace {
        self.trace.clone()
    }

    /// Persist the current trace through a store
    pub async fn persist(&self, store: &dyn Store) -> Result<()> {
        store.save(&self.trace).await
    }
}

/// Pluggable trace persistence
#[async_trait]
pub trait Store: Send + Sync {
    /// Save (or overwrite) a trace
    async fn save(&self, trace: &Trace) -> Result<()>;
    /// Load a trace by id
    async fn load(&self, id: &str) -> Result<Trace>;
    /// List stored trace ids
    async fn list(&self) -> Result<Vec<String>>;
    /// Delete a trace by id
    async fn delete(&self, id: &str) -> Result<()>;
}

/// In-memory store used by tests and the CLI
#[derive(Default, Clone)]
pub struct MemoryStore {
    traces: Arc<RwLock<HashMap<String, Trace>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save(&self, trace: &Trace) -> Result<()> {
        self.traces
            .write()
            .await
            .insert(trace.id.clone(), trace.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Trace> {
        self.traces
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("trace {}", id)))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.traces.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.traces
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("trace {}", id)))
    }
}
