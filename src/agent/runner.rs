//! The agent execution loop
//!
//! Drives one goal through the Plan -> Act -> Observe -> Reflect cycle:
//! the planner (LLM) picks a tool call, the dispatcher executes it under a
//! per-step timeout with transient-error retry, the observation lands in the
//! trace, and the reflector periodically reviews progress. Budgets (steps,
//! tokens, wall clock) and cancellation are checked at the top of every
//! iteration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::llm::{Completion, GenerationOptions, LlmClient, Message, Reply};
use crate::tools::{Tool, ToolRegistry};
use crate::trace::{
    Action, Observation, Reflection, ReflectionDecision, Step, Trace, TraceRecorder, TraceStatus,
};

use super::loop_guard::LoopGuard;
use super::reflector::Reflector;

/// Floor for the per-step tool timeout
const MIN_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// The result of one agent run. The trace is always present, also on failure.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Final answer when the run completed
    pub answer: Option<String>,
    /// Categorized error string when it did not
    pub error: Option<String>,
    /// Full record of the run
    pub trace: Trace,
}

impl RunOutput {
    fn finished(answer: String, trace: Trace) -> Self {
        RunOutput {
            answer: Some(answer),
            error: None,
            trace,
        }
    }

    fn failed(error: impl Into<String>, trace: Trace) -> Self {
        RunOutput {
            answer: None,
            error: Some(error.into()),
            trace,
        }
    }
}

/// One instance of the plan/act/observe/reflect loop
pub struct Agent {
    /// Agent type this instance was created as
    agent_type: String,
    /// System prompt selected by the factory
    system_prompt: String,
    /// LLM client
    llm: Arc<dyn LlmClient>,
    /// Tool registry
    tools: Arc<ToolRegistry>,
    /// Loop configuration
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        agent_type: impl Into<String>,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Agent {
            agent_type: agent_type.into(),
            system_prompt: system_prompt.into(),
            llm,
            tools,
            config,
        }
    }

    /// The agent type this instance was created as
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Run the loop for `goal` until it finishes or a budget is exhausted.
    pub async fn run(&self, cancel: CancellationToken, goal: &str) -> RunOutput {
        let started = Instant::now();
        let mut recorder = TraceRecorder::new(goal, self.config.max_steps);
        let mut guard = LoopGuard::default();
        let reflector = Reflector::new(
            Arc::clone(&self.llm),
            self.config.reflection_steps.max(1),
        );
        // Short-term planner memory: cleared on replan, the trace is not.
        let mut scratch: Vec<Message> = Vec::new();
        let mut tokens_used: u64 = 0;
        let manifest = self.tools.manifest();
        let definitions = self.tools.definitions();

        info!(agent_type = %self.agent_type, goal, "Agent run started");

        loop {
            // Budget and cancellation checks, top of every iteration
            if cancel.is_cancelled() {
                recorder.finish(TraceStatus::Canceled);
                return RunOutput::failed("canceled", recorder.snapshot());
            }
            if recorder.step_count() >= self.config.max_steps {
                recorder.finish(TraceStatus::Failed);
                return RunOutput::failed("max steps exceeded", recorder.snapshot());
            }
            if started.elapsed() >= self.config.max_duration {
                recorder.finish(TraceStatus::Failed);
                return RunOutput::failed("deadline exceeded", recorder.snapshot());
            }
            if tokens_used >= u64::from(self.config.max_tokens) {
                recorder.finish(TraceStatus::Failed);
                return RunOutput::failed("token budget exceeded", recorder.snapshot());
            }

            // Plan
            let mut messages = vec![
                Message::system(&self.system_prompt),
                Message::user(super::prompts::planner_prompt(
                    goal,
                    recorder.steps(),
                    &manifest,
                )),
            ];
            messages.extend(scratch.iter().cloned());

            let completion = tokio::select! {
                _ = cancel.cancelled() => {
                    recorder.finish(TraceStatus::Canceled);
                    return RunOutput::failed("canceled", recorder.snapshot());
                }
                result = self.plan(messages, definitions.clone()) => match result {
                    Ok(completion) => completion,
                    Err(e) => {
                        recorder.finish(TraceStatus::Failed);
                        return RunOutput::failed(
                            format!("LLM failure: {}", e),
                            recorder.snapshot(),
                        );
                    }
                }
            };
            tokens_used += u64::from(completion.usage.total_tokens);

            let (name, args) = match completion.reply {
                // Plain text is the final answer
                Reply::Text(text) => {
                    recorder.finish(TraceStatus::Completed);
                    info!(steps = recorder.step_count(), "Agent finished with text reply");
                    return RunOutput::finished(text, recorder.snapshot());
                }
                Reply::ToolCall { name, arguments } => (name, arguments),
            };

            if name == "finish" {
                let answer = args
                    .get("answer")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| args.to_string());
                recorder.finish(TraceStatus::Completed);
                info!(steps = recorder.step_count(), "Agent finished");
                return RunOutput::finished(answer, recorder.snapshot());
            }

            if cancel.is_cancelled() {
                recorder.finish(TraceStatus::Canceled);
                return RunOutput::failed("canceled", recorder.snapshot());
            }

            // Act
            let action = Action {
                name: name.clone(),
                args: args.clone(),
                reason: args
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            };

            let observation = if guard.record(&name, &args) {
                warn!(tool = %name, "Loop guard refused repeated call");
                Observation::failure("loop detected", 0)
            } else {
                match self.tools.get(&name) {
                    None => Observation::failure(format!("unknown tool: {}", name), 0),
                    Some(tool) => {
                        let step_timeout = self.step_timeout(started, recorder.step_count());
                        self.invoke_with_retry(tool, &args, step_timeout, &cancel)
                            .await
                    }
                }
            };

            // Observe
            let failed = observation.is_error();
            if failed {
                scratch.push(Message::user(format!(
                    "The last action failed: {}. Consider a different approach.",
                    observation.err_msg.as_deref().unwrap_or("unknown error"),
                )));
            }
            if recorder
                .append(Step {
                    action,
                    observation,
                    timestamp: Utc::now(),
                })
                .is_err()
            {
                recorder.finish(TraceStatus::Failed);
                return RunOutput::failed("max steps exceeded", recorder.snapshot());
            }

            // Reflect every `reflection_steps` steps, or after any failure
            let due = self.config.reflection_steps > 0
                && recorder.step_count() % self.config.reflection_steps == 0;
            if failed || due {
                let step_index = recorder.step_count() - 1;
                match reflector.reflect(goal, recorder.steps()).await {
                    Ok(result) => {
                        let decision = result.decision;
                        let reason = result.reason.clone();
                        let _ = recorder.append_reflection(Reflection { step_index, result });
                        match decision {
                            ReflectionDecision::Continue => {}
                            ReflectionDecision::Replan => {
                                debug!("Reflection requested replan, clearing short-term memory");
                                scratch.clear();
                                guard.reset();
                            }
                            ReflectionDecision::Stop => {
                                recorder.finish(TraceStatus::Failed);
                                return RunOutput::failed(
                                    format!("stopped by reflection: {}", reason),
                                    recorder.snapshot(),
                                );
                            }
                        }
                    }
                    // Reflection is advisory; a broken verdict never kills the run
                    Err(e) => warn!("Reflection failed: {}", e),
                }
            }
        }
    }

    /// One planning call, retried once on failure.
    async fn plan(
        &self,
        messages: Vec<Message>,
        definitions: Vec<crate::llm::ToolDefinition>,
    ) -> Result<Completion> {
        match self
            .llm
            .complete(
                messages.clone(),
                definitions.clone(),
                GenerationOptions::default(),
            )
            .await
        {
            Ok(completion) => Ok(completion),
            Err(e) => {
                warn!("Planning call failed ({}), retrying once", e);
                self.llm
                    .complete(messages, definitions, GenerationOptions::default())
                    .await
            }
        }
    }

    /// Per-step timeout: remaining wall clock split across remaining steps,
    /// floored at five seconds.
    fn step_timeout(&self, started: Instant, steps_done: usize) -> Duration {
        let remaining_steps = (self.config.max_steps - steps_done).max(1) as u32;
        let remaining_time = self.config.max_duration.saturating_sub(started.elapsed());
        (remaining_time / remaining_steps).max(MIN_STEP_TIMEOUT)
    }

    /// Invoke a tool, retrying transient failures with exponential backoff.
    async fn invoke_with_retry(
        &self,
        tool: Arc<dyn Tool>,
        args: &serde_json::Value,
        step_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Observation {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut backoff = self.config.retry_backoff;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    return Observation::failure("canceled", started.elapsed().as_millis() as u64);
                }
                outcome = tokio::time::timeout(step_timeout, tool.execute(args.clone())) => {
                    match outcome {
                        Ok(inner) => inner,
                        Err(_) => Err(Error::Timeout(format!(
                            "tool '{}' exceeded {:?}",
                            tool.name(),
                            step_timeout
                        ))),
                    }
                }
            };

            let latency_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(result) if result.success => {
                    if attempt > 0 {
                        debug!(tool = %tool.name(), retries = attempt, "Tool succeeded after retry");
                    }
                    return Observation::success(
                        result.output.unwrap_or_else(|| serde_json::json!({})),
                        latency_ms,
                    );
                }
                // Domain failure: final, surfaces to the planner
                Ok(result) => {
                    return Observation::failure(
                        result.error.unwrap_or_else(|| "tool failed".to_string()),
                        latency_ms,
                    );
                }
                Err(e) if e.is_retryable()
                    && attempt < self.config.max_retries
                    && !cancel.is_cancelled() =>
                {
                    attempt += 1;
                    warn!(
                        tool = %tool.name(),
                        attempt,
                        max = self.config.max_retries,
                        "Transient tool failure ({}), backing off {:?}",
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    return Observation::failure(e.to_string(), latency_ms);
                }
            }
        }
    }
}
