//! Workflow, task, and execution types

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::trace::Trace;

/// Lifecycle status of a workflow task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Canceled,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// One unit of work inside a workflow, executed by a fresh agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the workflow
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Agent type drawn from the factory
    pub agent_type: String,
    /// The goal handed to the agent
    pub goal: String,
    /// Task-level input mapping
    #[serde(default)]
    pub input: Value,
    /// Ids of tasks that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Current status
    #[serde(default = "default_task_status")]
    pub status: TaskStatus,
    /// Output mapping once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error string once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The agent trace of this task's run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    /// When the task started running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

fn default_task_status() -> TaskStatus {
    TaskStatus::Pending
}

impl Task {
    /// Create a new pending task
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        Task {
            id: id.into(),
            name: name.into(),
            agent_type: agent_type.into(),
            goal: goal.into(),
            input: Value::Null,
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            output: None,
            error: None,
            trace: None,
            started_at: None,
            ended_at: None,
            duration_ms: None,
        }
    }

    /// Set the task-level input mapping (builder)
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Add a dependency (builder)
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }
}

/// How a workflow's tasks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowMode {
    /// Insertion order, one at a time. Declared dependencies are ignored for
    /// ordering but their outputs are still fed forward.
    Sequential,
    /// All tasks start at once, bounded by the engine's concurrency limit.
    Parallel,
    /// Dependency order with a ready-set scheduler.
    Dag,
}

/// A named set of tasks plus a scheduling mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name
    pub name: String,
    /// Scheduling mode
    pub mode: WorkflowMode,
    /// Tasks in insertion order
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Workflow {
    /// Create an empty workflow
    pub fn new(name: impl Into<String>, mode: WorkflowMode) -> Self {
        Workflow {
            name: name.into(),
            mode,
            tasks: Vec::new(),
        }
    }

    /// Append a task (builder)
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Index of a task by id
    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Validate the workflow: unique ids, known dependencies, acyclic graph.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }

        for task in &self.tasks {
            for dep in &task.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "task '{}' depends on unknown task '{}'",
                        task.id, dep
                    )));
                }
            }
        }

        // Kahn's algorithm; anything left unvisited sits on a cycle.
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in &self.tasks {
            indegree.insert(task.id.as_str(), task.dependencies.len());
            for dep in &task.dependencies {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(task.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self
            .tasks
            .iter()
            .filter(|t| t.dependencies.is_empty())
            .map(|t| t.id.as_str())
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in dependents.get(id).into_iter().flatten() {
                let remaining = indegree.get_mut(dependent).expect("dependent is a task");
                *remaining -= 1;
                if *remaining == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if visited < self.tasks.len() {
            let stuck: Vec<&str> = indegree
                .iter()
                .filter(|(_, &count)| count > 0)
                .map(|(&id, _)| id)
                .collect();
            return Err(Error::CycleDetected(format!(
                "tasks {:?} form a dependency cycle",
                stuck
            )));
        }

        Ok(())
    }
}

/// Lifecycle status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl FlowStatus {
    /// Whether the execution has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowStatus::Pending | FlowStatus::Running)
    }
}

/// One invocation of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowExecution {
    /// Unique execution id
    pub id: String,
    /// The workflow, with task state mutated in place as it runs
    pub workflow: Workflow,
    /// Current status
    pub status: FlowStatus,
    /// When the execution started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When it reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Aggregated output (`stats` plus per-task `results`)
    #[serde(default)]
    pub output: Value,
    /// Error string when the execution failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FlowExecution {
    /// Create a pending execution for `workflow`
    pub fn new(id: impl Into<String>, workflow: Workflow) -> Self {
        FlowExecution {
            id: id.into(),
            workflow,
            status: FlowStatus::Pending,
            start_time: None,
            end_time: None,
            duration_ms: None,
            output: Value::Null,
            error: None,
        }
    }
}

/// Aggregated execution statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    /// completed / total
    pub success_rate: f64,
    /// Steps across all task traces
    pub total_steps: usize,
    /// Events dropped to backpressure on the event bus
    pub events_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> Task {
        Task::new(id, id, "general", format!("do {}", id))
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let workflow = Workflow::new("w", WorkflowMode::Dag)
            .with_task(task("a"))
            .with_task(task("a"));
        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate task id"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let workflow =
            Workflow::new("w", WorkflowMode::Dag).with_task(task("a").depends_on("ghost"));
        let err = workflow.validate().unwrap_err();
        assert!(err.to_string().contains("unknown task 'ghost'"));
    }

    #[test]
    fn cycle_is_rejected() {
        let workflow = Workflow::new("w", WorkflowMode::Dag)
            .with_task(task("a").depends_on("b"))
            .with_task(task("b").depends_on("a"))
            .with_task(task("c"));
        let err = workflow.validate().unwrap_err();
        assert!(matches!(err, Error::CycleDetected(_)));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let workflow = Workflow::new("w", WorkflowMode::Dag).with_task(task("a").depends_on("a"));
        assert!(matches!(
            workflow.validate().unwrap_err(),
            Error::CycleDetected(_)
        ));
    }

    #[test]
    fn valid_dag_passes() {
        let workflow = Workflow::new("w", WorkflowMode::Dag)
            .with_task(task("a"))
            .with_task(task("b").depends_on("a"))
            .with_task(task("c").depends_on("a"))
            .with_task(task("d").depends_on("b").depends_on("c"));
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn workflow_serde_roundtrip() {
        let workflow = Workflow::new("pipeline", WorkflowMode::Sequential)
            .with_task(task("a").with_input(serde_json::json!({ "k": "v" })));
        let json = serde_json::to_string(&workflow).unwrap();
        assert!(json.contains("\"mode\":\"sequential\""));
        let parsed: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tasks[0].status, TaskStatus::Pending);
        assert_eq!(parsed.tasks[0].input["k"], "v");
    }
}
