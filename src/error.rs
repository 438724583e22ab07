//! Error types for FlowAgent

use thiserror::Error;

/// Result type alias using FlowAgent's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for FlowAgent
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution error (permanent)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Requested tool is not registered
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A step/token/deadline budget was exhausted
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// The surrounding context was canceled
    #[error("Canceled")]
    Canceled,

    /// A workflow task's dependency failed
    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    /// The workflow dependency graph contains a cycle
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    /// A JSON-RPC response did not arrive in time
    #[error("RPC timeout: {0}")]
    RpcTimeout(String),

    /// Malformed MCP message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::RateLimit(_) | Error::Timeout(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::ToolNotFound(_)
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Timeout("tool call".into()).is_retryable());
        assert!(Error::RateLimit("429".into()).is_retryable());
        assert!(!Error::Tool("bad args".into()).is_retryable());
        assert!(!Error::Canceled.is_retryable());
    }

    #[test]
    fn client_error_classification() {
        assert!(Error::ToolNotFound("nope".into()).is_client_error());
        assert!(!Error::Internal("boom".into()).is_client_error());
    }
}
