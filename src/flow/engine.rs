//! Workflow engine
//!
//! Validates a workflow, registers an execution, and drives it on a spawned
//! task: sequentially, all-at-once, or in dependency order with a ready-set
//! scheduler. Concurrency across the whole engine is bounded by one
//! semaphore; task state has a single writer (the worker that owns the
//! task); completion is signaled by the terminal event on the subscription
//! stream, never by polling.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::AgentFactory;
use crate::config::{AgentConfig, WorkflowConfig};
use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;
use crate::trace::TraceStatus;

use super::events::{EventBus, EventStream, FlowEventType};
use super::types::{FlowExecution, FlowStats, FlowStatus, TaskStatus, Workflow, WorkflowMode};

struct ExecutionHandle {
    execution: RwLock<FlowExecution>,
    bus: EventBus,
    cancel: CancellationToken,
}

/// Schedules workflows over agents drawn from a factory
pub struct FlowEngine {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    factory: Arc<dyn AgentFactory>,
    agent_config: AgentConfig,
    config: WorkflowConfig,
    semaphore: Arc<Semaphore>,
    executions: RwLock<HashMap<String, Arc<ExecutionHandle>>>,
}

impl FlowEngine {
    /// Create a new engine
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        factory: Arc<dyn AgentFactory>,
        agent_config: AgentConfig,
        config: WorkflowConfig,
    ) -> Self {
        FlowEngine {
            llm,
            tools,
            factory,
            agent_config,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `workflow` and start executing it. Returns the registered
    /// execution immediately; progress streams through [`Self::subscribe`].
    pub async fn execute(
        self: &Arc<Self>,
        workflow: Workflow,
        input: Value,
    ) -> Result<FlowExecution> {
        workflow.validate()?;

        let id = Uuid::new_v4().to_string();
        let execution = FlowExecution::new(id.clone(), workflow);
        let handle = Arc::new(ExecutionHandle {
            bus: EventBus::new(id.clone(), self.config.event_buffer),
            execution: RwLock::new(execution.clone()),
            cancel: CancellationToken::new(),
        });
        self.executions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&handle));

        info!(execution_id = %id, "Workflow execution registered");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.drive(handle, input).await;
        });

        Ok(execution)
    }

    /// Snapshot an execution by id
    pub async fn get_execution(&self, id: &str) -> Option<FlowExecution> {
        let handle = self.executions.read().await.get(id).cloned()?;
        let execution = handle.execution.read().await.clone();
        Some(execution)
    }

    /// Subscribe to an execution's event stream
    pub async fn subscribe(&self, id: &str) -> Option<EventStream> {
        let handle = self.executions.read().await.get(id).cloned()?;
        Some(handle.bus.subscribe())
    }

    /// Cancel an execution. Idempotent; running agents observe the token at
    /// their next suspension point.
    pub async fn cancel_execution(&self, id: &str) -> Result<()> {
        let handle = self
            .executions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("execution {}", id)))?;
        handle.cancel.cancel();
        Ok(())
    }

    /// Release an execution's resources. Only the first call does anything;
    /// returns whether this call removed it.
    pub async fn cleanup(&self, id: &str) -> bool {
        match self.executions.write().await.remove(id) {
            Some(handle) => {
                handle.cancel.cancel();
                handle.bus.close();
                true
            }
            None => false,
        }
    }

    /// Block until the execution reaches a terminal state, using the event
    /// stream's terminal event as the completion signal.
    pub async fn wait(&self, id: &str) -> Option<FlowExecution> {
        let mut stream = self.subscribe(id).await?;
        while let Some(event) = stream.recv().await {
            if event.event_type.is_terminal() {
                break;
            }
        }
        self.get_execution(id).await
    }

    async fn drive(self: Arc<Self>, handle: Arc<ExecutionHandle>, input: Value) {
        let (name, mode) = {
            let mut execution = handle.execution.write().await;
            execution.status = FlowStatus::Running;
            execution.start_time = Some(Utc::now());
            (execution.workflow.name.clone(), execution.workflow.mode)
        };

        handle.bus.publish(
            FlowEventType::FlowStarted,
            None,
            format!("workflow '{}' started", name),
            None,
        );

        match mode {
            WorkflowMode::Sequential => self.run_sequential(&handle, &input).await,
            WorkflowMode::Parallel => self.run_parallel(&handle, &input).await,
            WorkflowMode::Dag => self.run_dag(&handle, &input).await,
        }

        self.finalize(&handle).await;
    }

    async fn finalize(&self, handle: &Arc<ExecutionHandle>) {
        let canceled = handle.cancel.is_cancelled();
        let dropped = handle.bus.dropped();

        let (status, message) = {
            let mut execution = handle.execution.write().await;

            for task in &mut execution.workflow.tasks {
                if !task.status.is_terminal() {
                    task.status = TaskStatus::Canceled;
                }
            }

            let tasks = &execution.workflow.tasks;
            let total = tasks.len();
            let completed = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count();
            let failed = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .count();
            let skipped = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Skipped)
                .count();
            let total_steps = tasks
                .iter()
                .filter_map(|t| t.trace.as_ref())
                .map(|trace| trace.steps.len())
                .sum();

            let stats = FlowStats {
                total_tasks: total,
                completed_tasks: completed,
                failed_tasks: failed,
                skipped_tasks: skipped,
                success_rate: completed as f64 / total.max(1) as f64,
                total_steps,
                events_dropped: dropped,
            };

            let mut results = Map::new();
            for task in tasks {
                if let Some(output) = &task.output {
                    results.insert(task.id.clone(), output.clone());
                }
            }

            let status = if canceled {
                FlowStatus::Canceled
            } else if failed > 0 {
                FlowStatus::Failed
            } else {
                FlowStatus::Completed
            };

            execution.status = status;
            execution.output = serde_json::json!({
                "stats": stats,
                "results": Value::Object(results),
            });
            if failed > 0 {
                execution.error = Some(format!("{} task(s) failed", failed));
            }
            let end = Utc::now();
            execution.end_time = Some(end);
            execution.duration_ms = execution
                .start_time
                .map(|start| (end - start).num_milliseconds().max(0) as u64);

            let message = format!(
                "workflow finished: {}/{} tasks completed, {} failed, {} skipped",
                completed, total, failed, skipped
            );
            (status, message)
        };

        let event_type = match status {
            FlowStatus::Canceled => FlowEventType::FlowCanceled,
            FlowStatus::Failed => FlowEventType::FlowFailed,
            _ => FlowEventType::FlowCompleted,
        };
        handle.bus.publish(event_type, None, message, None);
        handle.bus.close();

        info!(status = ?status, "Workflow execution finished");
    }

    /// Insertion order, one task at a time. Declared dependencies do not
    /// reorder anything; they only gate on failure and select which outputs
    /// feed forward.
    async fn run_sequential(self: &Arc<Self>, handle: &Arc<ExecutionHandle>, input: &Value) {
        let count = handle.execution.read().await.workflow.tasks.len();

        for index in 0..count {
            if handle.cancel.is_cancelled() {
                break;
            }

            let blocked = {
                let execution = handle.execution.read().await;
                let task = &execution.workflow.tasks[index];
                task.dependencies.iter().any(|dep| {
                    execution
                        .workflow
                        .task_index(dep)
                        .map(|i| {
                            matches!(
                                execution.workflow.tasks[i].status,
                                TaskStatus::Failed | TaskStatus::Skipped
                            )
                        })
                        .unwrap_or(false)
                })
            };
            if blocked {
                self.skip_task(handle, index, "dependency failed").await;
                continue;
            }

            self.run_task(handle, index, input).await;
        }
    }

    /// Start everything at once under the engine's semaphore.
    async fn run_parallel(self: &Arc<Self>, handle: &Arc<ExecutionHandle>, input: &Value) {
        let count = handle.execution.read().await.workflow.tasks.len();
        let mut workers = JoinSet::new();

        for index in 0..count {
            let engine = Arc::clone(self);
            let handle = Arc::clone(handle);
            let input = input.clone();
            workers.spawn(async move {
                tokio::select! {
                    _ = handle.cancel.cancelled() => {
                        engine.mark_canceled(&handle, index).await;
                    }
                    permit = Arc::clone(&engine.semaphore).acquire_owned() => {
                        if permit.is_ok() {
                            engine.run_task(&handle, index, &input).await;
                        }
                    }
                }
            });
        }

        while workers.join_next().await.is_some() {}
    }

    /// Ready-set scheduler: tasks become ready when all dependencies have
    /// completed; a failure skips the whole descendant subtree.
    async fn run_dag(self: &Arc<Self>, handle: &Arc<ExecutionHandle>, input: &Value) {
        let (count, dependents, mut remaining) = {
            let execution = handle.execution.read().await;
            let workflow = &execution.workflow;
            let count = workflow.tasks.len();
            let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
            let mut remaining: Vec<usize> = vec![0; count];
            for (index, task) in workflow.tasks.iter().enumerate() {
                remaining[index] = task.dependencies.len();
                for dep in &task.dependencies {
                    if let Some(dep_index) = workflow.task_index(dep) {
                        dependents[dep_index].push(index);
                    }
                }
            }
            (count, dependents, remaining)
        };

        let mut state: Vec<Option<TaskStatus>> = vec![None; count];
        let mut ready: VecDeque<usize> = (0..count).filter(|&i| remaining[i] == 0).collect();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, TaskStatus)>();
        let mut in_flight = 0usize;

        loop {
            while let Some(index) = ready.pop_front() {
                if handle.cancel.is_cancelled() {
                    break;
                }
                let engine = Arc::clone(self);
                let handle = Arc::clone(handle);
                let input = input.clone();
                let done = done_tx.clone();
                in_flight += 1;
                tokio::spawn(async move {
                    let status = tokio::select! {
                        _ = handle.cancel.cancelled() => {
                            engine.mark_canceled(&handle, index).await;
                            TaskStatus::Canceled
                        }
                        permit = Arc::clone(&engine.semaphore).acquire_owned() => {
                            match permit {
                                Ok(_permit) => engine.run_task(&handle, index, &input).await,
                                Err(_) => TaskStatus::Canceled,
                            }
                        }
                    };
                    let _ = done.send((index, status));
                });
            }

            if in_flight == 0 {
                break;
            }

            let Some((index, status)) = done_rx.recv().await else {
                break;
            };
            in_flight -= 1;
            state[index] = Some(status);

            match status {
                TaskStatus::Completed => {
                    for &dependent in &dependents[index] {
                        if state[dependent].is_some() {
                            continue;
                        }
                        remaining[dependent] -= 1;
                        if remaining[dependent] == 0 {
                            ready.push_back(dependent);
                        }
                    }
                }
                TaskStatus::Failed | TaskStatus::Skipped => {
                    self.skip_descendants(handle, index, &dependents, &mut state)
                        .await;
                }
                _ => {}
            }

            if handle.cancel.is_cancelled() && in_flight == 0 {
                break;
            }
        }
    }

    /// Mark every not-yet-scheduled descendant of `index` skipped,
    /// breadth-first in insertion order.
    async fn skip_descendants(
        self: &Arc<Self>,
        handle: &Arc<ExecutionHandle>,
        index: usize,
        dependents: &[Vec<usize>],
        state: &mut [Option<TaskStatus>],
    ) {
        let mut queue: VecDeque<usize> = dependents[index].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if state[next].is_some() {
                continue;
            }
            state[next] = Some(TaskStatus::Skipped);
            self.skip_task(handle, next, "dependency failed").await;
            queue.extend(dependents[next].iter().copied());
        }
    }

    async fn skip_task(&self, handle: &Arc<ExecutionHandle>, index: usize, reason: &str) {
        let (id, name) = {
            let mut execution = handle.execution.write().await;
            let task = &mut execution.workflow.tasks[index];
            task.status = TaskStatus::Skipped;
            task.error = Some(reason.to_string());
            (task.id.clone(), task.name.clone())
        };
        debug!(task_id = %id, "Task skipped: {}", reason);
        handle.bus.publish(
            FlowEventType::TaskSkipped,
            Some(id),
            format!("task '{}' skipped: {}", name, reason),
            None,
        );
    }

    async fn mark_canceled(&self, handle: &Arc<ExecutionHandle>, index: usize) {
        let mut execution = handle.execution.write().await;
        let task = &mut execution.workflow.tasks[index];
        if !task.status.is_terminal() {
            task.status = TaskStatus::Canceled;
        }
    }

    /// Run one task to completion on a fresh agent. Returns its terminal
    /// status; the worker is the only writer of the task's output and error.
    async fn run_task(
        self: &Arc<Self>,
        handle: &Arc<ExecutionHandle>,
        index: usize,
        flow_input: &Value,
    ) -> TaskStatus {
        let (id, name, agent_type, goal, dependencies, task_input) = {
            let execution = handle.execution.read().await;
            let task = &execution.workflow.tasks[index];
            (
                task.id.clone(),
                task.name.clone(),
                task.agent_type.clone(),
                task.goal.clone(),
                task.dependencies.clone(),
                task.input.clone(),
            )
        };

        if handle.cancel.is_cancelled() {
            self.mark_canceled(handle, index).await;
            return TaskStatus::Canceled;
        }

        // Merged input: workflow input + task input + dependency outputs
        let mut merged = Map::new();
        if let Some(object) = flow_input.as_object() {
            merged.extend(object.clone());
        }
        if let Some(object) = task_input.as_object() {
            merged.extend(object.clone());
        }
        {
            let execution = handle.execution.read().await;
            for dep in &dependencies {
                if let Some(dep_index) = execution.workflow.task_index(dep) {
                    if let Some(output) = &execution.workflow.tasks[dep_index].output {
                        merged.insert(dep.clone(), output.clone());
                    }
                }
            }
        }

        {
            let mut execution = handle.execution.write().await;
            let task = &mut execution.workflow.tasks[index];
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        }
        handle.bus.publish(
            FlowEventType::TaskStarted,
            Some(id.clone()),
            format!("task '{}' started", name),
            None,
        );

        let agent = self.factory.create(
            &agent_type,
            Arc::clone(&self.llm),
            Arc::clone(&self.tools),
            &self.agent_config,
        );

        let goal = if merged.is_empty() {
            goal
        } else {
            format!(
                "{}\n\nInput:\n{}",
                goal,
                serde_json::to_string_pretty(&Value::Object(merged)).unwrap_or_default()
            )
        };

        let run = agent.run(handle.cancel.child_token(), &goal).await;

        let status = {
            let mut execution = handle.execution.write().await;
            let task = &mut execution.workflow.tasks[index];
            let ended = Utc::now();
            task.ended_at = Some(ended);
            task.duration_ms = task
                .started_at
                .map(|started| (ended - started).num_milliseconds().max(0) as u64);

            let status = match (&run.answer, run.trace.status) {
                (Some(answer), _) => {
                    task.output = Some(serde_json::json!({ "answer": answer }));
                    TaskStatus::Completed
                }
                (None, TraceStatus::Canceled) => TaskStatus::Canceled,
                (None, _) => {
                    task.error = run.error.clone();
                    TaskStatus::Failed
                }
            };
            task.trace = Some(run.trace);
            task.status = status;
            status
        };

        match status {
            TaskStatus::Completed => {
                handle.bus.publish(
                    FlowEventType::TaskCompleted,
                    Some(id),
                    format!("task '{}' completed", name),
                    None,
                );
            }
            TaskStatus::Failed => {
                warn!(task_id = %id, "Task failed: {}", run.error.as_deref().unwrap_or("unknown"));
                handle.bus.publish(
                    FlowEventType::TaskFailed,
                    Some(id),
                    format!(
                        "task '{}' failed: {}",
                        name,
                        run.error.as_deref().unwrap_or("unknown")
                    ),
                    None,
                );
            }
            _ => {}
        }

        status
    }
}
