//! Configuration module
//!
//! Split into focused files the same way the rest of the crate is wired:
//! - mod.rs: configuration types and defaults
//! - io.rs: loading from file and environment
//! - validation.rs: startup validation
//!
//! Durations are human-readable in config files ("5m", "1s") via
//! humantime-serde; the API key is held as a `SecretString` and only exposed
//! at the HTTP-header construction site.

mod io;
mod validation;

pub use io::load_config;
pub use validation::validate_config;

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// LLM provider settings
    pub llm: LlmConfig,
    /// Agent loop settings
    pub agent: AgentConfig,
    /// Workflow engine settings
    pub workflow: WorkflowConfig,
    /// Remote MCP servers, keyed by name
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

/// LLM provider configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,
    /// Base URL of the chat-completions API
    pub base_url: String,
    /// API key (required)
    pub api_key: SecretString,
    /// Sampling temperature, in [0, 2]
    pub temperature: f32,
    /// Per-completion token cap
    pub max_tokens: u32,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout_s: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            model: "gpt-3.5-turbo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: SecretString::from(""),
            temperature: 0.1,
            max_tokens: 4000,
            timeout_s: Duration::from_secs(30),
        }
    }
}

/// Agent loop configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum steps per run
    pub max_steps: usize,
    /// Token budget per run
    pub max_tokens: u32,
    /// Wall-clock budget per run
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,
    /// Reflect every this many steps (0 disables periodic reflection)
    pub reflection_steps: usize,
    /// Transient tool failures retried per step
    pub max_retries: u32,
    /// Initial retry backoff, doubled per attempt
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_steps: 10,
            max_tokens: 8000,
            max_duration: Duration::from_secs(300),
            reflection_steps: 3,
            max_retries: 2,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Concurrently running tasks across the engine
    pub max_concurrency: usize,
    /// Event-bus buffer per subscriber
    pub event_buffer: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            max_concurrency: 5,
            event_buffer: 64,
        }
    }
}

/// One remote MCP server
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    /// Base URL (the `/sse` suffix is appended when missing)
    pub url: String,
    /// Extra headers sent on every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gpt-3.5-turbo");
        assert_eq!(config.llm.temperature, 0.1);
        assert_eq!(config.llm.max_tokens, 4000);
        assert_eq!(config.llm.timeout_s, Duration::from_secs(30));

        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.agent.max_tokens, 8000);
        assert_eq!(config.agent.max_duration, Duration::from_secs(300));
        assert_eq!(config.agent.reflection_steps, 3);
        assert_eq!(config.agent.max_retries, 2);
        assert_eq!(config.agent.retry_backoff, Duration::from_secs(1));

        assert_eq!(config.workflow.max_concurrency, 5);
        assert_eq!(config.workflow.event_buffer, 64);
        assert!(config.mcp_servers.is_empty());
    }
}
