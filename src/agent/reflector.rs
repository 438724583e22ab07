//! Reflection phase - reviews recent steps and decides whether to continue
//!
//! Every `reflection_steps` steps (and after any failed observation) the
//! agent asks the LLM for a JSON verdict over the last few steps. The verdict
//! is advisory: an unparseable reply degrades to `continue` with zero
//! confidence instead of failing the run.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::{GenerationOptions, LlmClient, Message, Reply};
use crate::trace::{ReflectionDecision, ReflectionResult, Step};

use super::prompts;

/// Reflector for reviewing execution results
pub struct Reflector {
    /// LLM client used for verdicts
    llm: Arc<dyn LlmClient>,
    /// How many recent steps each verdict reviews
    window: usize,
}

impl Reflector {
    /// Create a new reflector reviewing the last `window` steps
    pub fn new(llm: Arc<dyn LlmClient>, window: usize) -> Self {
        Self { llm, window }
    }

    /// Ask the LLM for a verdict over the most recent steps
    pub async fn reflect(&self, goal: &str, steps: &[Step]) -> Result<ReflectionResult> {
        let start = steps.len().saturating_sub(self.window);
        let prompt = prompts::reflection_prompt(goal, &steps[start..]);

        let completion = self
            .llm
            .complete(
                vec![Message::user(prompt)],
                vec![],
                GenerationOptions::precise(),
            )
            .await?;

        let text = match completion.reply {
            Reply::Text(text) => text,
            Reply::ToolCall { name, .. } => {
                warn!("Reflection returned a tool call ({}), ignoring", name);
                return Ok(Self::fallback("reflection returned a tool call"));
            }
        };

        Ok(Self::parse_verdict(&text))
    }

    /// Parse a verdict, tolerating markdown code fences around the JSON.
    fn parse_verdict(text: &str) -> ReflectionResult {
        let stripped = strip_code_fence(text);
        match serde_json::from_str::<ReflectionResult>(stripped) {
            Ok(mut result) => {
                result.confidence = result.confidence.clamp(0.0, 1.0);
                debug!(
                    "Reflection verdict: {:?} (confidence {:.2})",
                    result.decision, result.confidence
                );
                result
            }
            Err(e) => {
                warn!("Unparseable reflection verdict ({}): {}", e, text);
                Self::fallback(text)
            }
        }
    }

    fn fallback(reason: &str) -> ReflectionResult {
        ReflectionResult {
            reason: reason.to_string(),
            confidence: 0.0,
            decision: ReflectionDecision::Continue,
        }
    }
}

/// Strip a surrounding ``` / ```json fence if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_verdict() {
        let result = Reflector::parse_verdict(
            r#"{"decision": "replan", "confidence": 0.7, "reason": "stuck on 404s"}"#,
        );
        assert_eq!(result.decision, ReflectionDecision::Replan);
        assert!((result.confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(result.reason, "stuck on 404s");
    }

    #[test]
    fn parses_fenced_json_verdict() {
        let result = Reflector::parse_verdict(
            "```json\n{\"decision\": \"stop\", \"confidence\": 1.0, \"reason\": \"impossible\"}\n```",
        );
        assert_eq!(result.decision, ReflectionDecision::Stop);
    }

    #[test]
    fn clamps_confidence() {
        let result = Reflector::parse_verdict(
            r#"{"decision": "continue", "confidence": 3.5, "reason": "sure"}"#,
        );
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unparseable_verdict_degrades_to_continue() {
        let result = Reflector::parse_verdict("everything looks great, carry on!");
        assert_eq!(result.decision, ReflectionDecision::Continue);
        assert_eq!(result.confidence, 0.0);
    }
}
