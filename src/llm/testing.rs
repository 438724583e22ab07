//! Scripted [`LlmClient`] implementation for agent and workflow tests.
//!
//! Replies are routed by substring match against the accumulated user
//! messages, so concurrent agents with different goals each consume their
//! own script.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::{Completion, GenerationOptions, LlmClient, Message, Reply, ToolDefinition, Usage};

/// One scripted turn.
#[derive(Debug, Clone)]
pub(crate) enum ScriptStep {
    /// Reply with plain text (the agent treats this as the final answer).
    Text(String),
    /// Reply with a tool call.
    ToolCall { name: String, arguments: Value },
    /// Fail with a non-retryable LLM error.
    Fail(String),
    /// Fail with a retryable transport error.
    FailTransient(String),
}

/// Marker distinguishing reflection prompts from planner prompts.
const REFLECTION_MARKER: &str = "Respond with ONLY a JSON object";

pub(crate) struct ScriptedLlm {
    routes: Mutex<Vec<(String, VecDeque<ScriptStep>)>>,
    reflections: Mutex<VecDeque<ScriptStep>>,
    default_text: Option<String>,
    delay: Option<Duration>,
    usage_per_call: u32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub(crate) fn new() -> Self {
        ScriptedLlm {
            routes: Mutex::new(Vec::new()),
            reflections: Mutex::new(VecDeque::new()),
            default_text: None,
            delay: None,
            usage_per_call: 10,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Script `steps` for any conversation whose user messages contain `needle`.
    pub(crate) fn route(self, needle: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((needle.into(), steps.into()));
        self
    }

    /// Script replies for reflection prompts. When exhausted (or never set),
    /// reflection calls get a default `continue` verdict so planner scripts
    /// are never consumed by reflection.
    pub(crate) fn route_reflection(self, steps: Vec<ScriptStep>) -> Self {
        *self.reflections.lock().unwrap() = steps.into();
        self
    }

    /// Fallback text reply once (or when) no route matches.
    pub(crate) fn with_default_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = Some(text.into());
        self
    }

    /// Sleep this long inside every call (for concurrency tests).
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Tokens reported per completion (for budget tests).
    pub(crate) fn with_usage_per_call(mut self, tokens: u32) -> Self {
        self.usage_per_call = tokens;
        self
    }

    /// Highest number of completions observed in flight at once.
    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total completions served.
    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, haystack: &str) -> Option<ScriptStep> {
        if haystack.contains(REFLECTION_MARKER) {
            return Some(
                self.reflections.lock().unwrap().pop_front().unwrap_or_else(|| {
                    ScriptStep::Text(
                        r#"{"decision": "continue", "confidence": 0.5, "reason": "scripted"}"#
                            .to_string(),
                    )
                }),
            );
        }

        let mut routes = self.routes.lock().unwrap();
        for (needle, steps) in routes.iter_mut() {
            if haystack.contains(needle.as_str()) {
                if let Some(step) = steps.pop_front() {
                    return Some(step);
                }
            }
        }
        self.default_text.clone().map(ScriptStep::Text)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _options: GenerationOptions,
    ) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let haystack: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let step = self.next_step(&haystack);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let usage = Usage {
            prompt_tokens: self.usage_per_call / 2,
            completion_tokens: self.usage_per_call - self.usage_per_call / 2,
            total_tokens: self.usage_per_call,
        };

        match step {
            Some(ScriptStep::Text(text)) => Ok(Completion {
                reply: Reply::Text(text),
                usage,
            }),
            Some(ScriptStep::ToolCall { name, arguments }) => Ok(Completion {
                reply: Reply::ToolCall { name, arguments },
                usage,
            }),
            Some(ScriptStep::Fail(msg)) => Err(Error::Llm(msg)),
            Some(ScriptStep::FailTransient(msg)) => Err(Error::Timeout(msg)),
            None => Err(Error::Llm("script exhausted".to_string())),
        }
    }
}

/// Shorthand for a scripted finish-tool call.
pub(crate) fn finish(answer: &str) -> ScriptStep {
    ScriptStep::ToolCall {
        name: "finish".to_string(),
        arguments: serde_json::json!({ "answer": answer }),
    }
}

/// Shorthand for a scripted tool call.
pub(crate) fn call(name: &str, arguments: Value) -> ScriptStep {
    ScriptStep::ToolCall {
        name: name.to_string(),
        arguments,
    }
}
