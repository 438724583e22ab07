//! LLM client interface and the OpenAI-compatible HTTP implementation

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::llm::types::*;

/// The planner's decision extracted from one completion
#[derive(Debug, Clone)]
pub enum Reply {
    /// The model asked for a tool invocation
    ToolCall {
        /// Name of the requested tool
        name: String,
        /// Parsed arguments object
        arguments: Value,
    },
    /// Plain text, used as the final answer
    Text(String),
}

/// Result of a single completion call
#[derive(Debug, Clone)]
pub struct Completion {
    /// The model's reply
    pub reply: Reply,
    /// Token usage, estimated when the provider does not report it
    pub usage: Usage,
}

/// One-shot completion with tool-calling support
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a single completion over `messages` with `tools` offered to the model.
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: GenerationOptions,
    ) -> Result<Completion>;
}

/// Client for OpenAI-compatible chat completion APIs
#[derive(Clone)]
pub struct OpenAiClient {
    /// HTTP client
    client: Client,
    /// Configuration
    config: LlmConfig,
}

impl OpenAiClient {
    /// Create a new client from configuration
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!(
                "Bearer {}",
                config.api_key.expose_secret()
            ))
            .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout_s)
            .build()?;

        Ok(OpenAiClient { client, config })
    }

    /// Get the configured default model
    pub fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn send_request(
        &self,
        request: ChatCompletionRequest,
        timeout: Option<std::time::Duration>,
    ) -> Result<ChatCompletionResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!("Sending completion request: model={}", request.model);

        let mut builder = self.client.post(&url).json(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json::<ChatCompletionResponse>().await?)
        } else {
            let error_text = response.text().await.unwrap_or_default();
            match status.as_u16() {
                429 => {
                    warn!("Rate limit exceeded: {}", error_text);
                    Err(Error::RateLimit(error_text))
                }
                401 => Err(Error::Llm("Invalid API key".to_string())),
                _ => Err(Error::Llm(format!("API error ({}): {}", status, error_text))),
            }
        }
    }

    /// Extract the planner's reply from the first choice.
    ///
    /// A tool call with unparsable arguments is a schema violation, not a
    /// transport error, so it maps to a non-retryable `Error::Llm`.
    fn extract_reply(response: &ChatCompletionResponse) -> Result<Reply> {
        let choice = response
            .choices
            .first()
            .ok_or_else(|| Error::Llm("Empty completion response".to_string()))?;

        if let Some(calls) = &choice.message.tool_calls {
            if let Some(call) = calls.first() {
                let arguments: Value = serde_json::from_str(&call.function.arguments)
                    .map_err(|e| {
                        Error::Llm(format!(
                            "Malformed tool arguments for '{}': {}",
                            call.function.name, e
                        ))
                    })?;
                return Ok(Reply::ToolCall {
                    name: call.function.name.clone(),
                    arguments,
                });
            }
        }

        Ok(Reply::Text(choice.message.content.clone()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: GenerationOptions,
    ) -> Result<Completion> {
        let prompt_chars: String = messages.iter().map(|m| m.content.as_str()).collect();

        let request = ChatCompletionRequest {
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            messages,
            max_tokens: options.max_tokens.or(Some(self.config.max_tokens)),
            temperature: options.temperature.or(Some(self.config.temperature)),
            tool_choice: if tools.is_empty() {
                None
            } else {
                Some("auto".to_string())
            },
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let response = self.send_request(request, options.timeout).await?;
        let reply = Self::extract_reply(&response)?;

        let usage = response.usage.unwrap_or_else(|| {
            let completion_text = match &reply {
                Reply::Text(text) => text.clone(),
                Reply::ToolCall { name, arguments } => format!("{}{}", name, arguments),
            };
            Usage::estimate(&prompt_chars, &completion_text)
        });

        Ok(Completion { reply, usage })
    }
}
