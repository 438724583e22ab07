//! Per-server notification handling
//!
//! Incoming MCP notifications are translated into goal strings and queued
//! for a standalone agent. Handlers are chosen per server name through a
//! factory; the default handler extracts an instrument symbol from the
//! notification params and phrases an analysis goal. Keep protocol-specific
//! logic in specialized handlers, not here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentFactory;
use crate::config::AgentConfig;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

use super::protocol::McpMessage;

/// Translates a notification into an agent goal
pub trait NotificationHandler: Send + Sync {
    /// Return a goal string for this notification, or `None` to ignore it.
    fn handle(&self, server: &str, message: &McpMessage) -> Option<String>;
}

/// Default handler: extracts a symbol from `params.{symbol|code|ticker}`
/// (first match wins) and asks for an analysis of the update.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNotificationHandler;

impl NotificationHandler for DefaultNotificationHandler {
    fn handle(&self, server: &str, message: &McpMessage) -> Option<String> {
        let method = message.method.as_deref().unwrap_or("unknown");
        let params = message.params.as_ref()?;

        let symbol = ["symbol", "code", "ticker"]
            .iter()
            .find_map(|key| params.get(*key).and_then(|v| v.as_str()))?;

        Some(format!(
            "The MCP server '{}' sent a '{}' notification for symbol '{}'. \
             Analyze what changed and summarize whether it needs attention. \
             Notification params: {}",
            server, method, symbol, params
        ))
    }
}

/// Chooses a notification handler per server name
pub struct HandlerFactory {
    handlers: HashMap<String, Arc<dyn NotificationHandler>>,
    default: Arc<dyn NotificationHandler>,
}

impl Default for HandlerFactory {
    fn default() -> Self {
        HandlerFactory {
            handlers: HashMap::new(),
            default: Arc::new(DefaultNotificationHandler),
        }
    }
}

impl HandlerFactory {
    /// Create a factory with the default handler as fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a specialized handler for `server`
    pub fn register(&mut self, server: impl Into<String>, handler: Arc<dyn NotificationHandler>) {
        self.handlers.insert(server.into(), handler);
    }

    /// The handler for `server` (the default one when none is registered)
    pub fn for_server(&self, server: &str) -> Arc<dyn NotificationHandler> {
        self.handlers
            .get(server)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

/// Create the global goal channel shared by all SSE clients
pub fn goal_channel(capacity: usize) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(capacity.max(1))
}

/// Consume queued goals on a standalone general agent until canceled.
pub async fn run_goal_consumer(
    mut goals: mpsc::Receiver<String>,
    factory: Arc<dyn AgentFactory>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    cancel: CancellationToken,
) {
    info!("MCP goal consumer started");
    loop {
        let goal = tokio::select! {
            _ = cancel.cancelled() => break,
            goal = goals.recv() => match goal {
                Some(goal) => goal,
                None => break,
            },
        };

        debug!(goal = %goal, "Processing MCP goal");
        let agent = factory.create("general", Arc::clone(&llm), Arc::clone(&tools), &config);
        let output = agent.run(cancel.child_token(), &goal).await;
        match output.answer {
            Some(answer) => info!(
                steps = output.trace.steps.len(),
                "MCP goal done: {}",
                &answer[..answer.len().min(200)]
            ),
            None => warn!(
                "MCP goal failed: {}",
                output.error.as_deref().unwrap_or("unknown")
            ),
        }
    }
    info!("MCP goal consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(params: serde_json::Value) -> McpMessage {
        McpMessage::notification("price/update", Some(params))
    }

    #[test]
    fn extracts_symbol_first() {
        let handler = DefaultNotificationHandler;
        let goal = handler
            .handle(
                "market",
                &notification(serde_json::json!({ "symbol": "BTCUSD", "code": "ignored" })),
            )
            .unwrap();
        assert!(goal.contains("for symbol 'BTCUSD'"));
        assert!(goal.contains("market"));
        assert!(goal.contains("price/update"));
    }

    #[test]
    fn falls_back_to_code_then_ticker() {
        let handler = DefaultNotificationHandler;
        let goal = handler
            .handle("m", &notification(serde_json::json!({ "code": "600519" })))
            .unwrap();
        assert!(goal.contains("600519"));

        let goal = handler
            .handle("m", &notification(serde_json::json!({ "ticker": "AAPL" })))
            .unwrap();
        assert!(goal.contains("AAPL"));
    }

    #[test]
    fn no_symbol_means_no_goal() {
        let handler = DefaultNotificationHandler;
        assert!(handler
            .handle("m", &notification(serde_json::json!({ "other": 1 })))
            .is_none());
        assert!(handler
            .handle("m", &McpMessage::notification("tick", None))
            .is_none());
    }

    #[test]
    fn factory_prefers_registered_handler() {
        struct FixedHandler;
        impl NotificationHandler for FixedHandler {
            fn handle(&self, _server: &str, _message: &McpMessage) -> Option<String> {
                Some("fixed goal".to_string())
            }
        }

        let mut factory = HandlerFactory::new();
        factory.register("special", Arc::new(FixedHandler));

        let message = notification(serde_json::json!({}));
        assert_eq!(
            factory.for_server("special").handle("special", &message),
            Some("fixed goal".to_string())
        );
        // Unregistered servers get the default symbol-extracting handler.
        assert!(factory.for_server("other").handle("other", &message).is_none());
    }

    #[tokio::test]
    async fn goal_consumer_runs_agents_until_canceled() {
        use crate::agent::DefaultAgentFactory;
        use crate::llm::testing::ScriptedLlm;

        let (tx, rx) = goal_channel(8);
        let llm = Arc::new(ScriptedLlm::new().with_default_text("analyzed"));
        let cancel = CancellationToken::new();

        let consumer = tokio::spawn(run_goal_consumer(
            rx,
            Arc::new(DefaultAgentFactory),
            Arc::clone(&llm) as Arc<dyn LlmClient>,
            Arc::new(ToolRegistry::new()),
            AgentConfig::default(),
            cancel.clone(),
        ));

        tx.send("look at BTCUSD".to_string()).await.unwrap();
        tx.send("look at ETHUSD".to_string()).await.unwrap();

        // Closing the channel ends the consumer after it drains.
        drop(tx);
        consumer.await.unwrap();
        assert_eq!(llm.call_count(), 2);
        cancel.cancel();
    }
}
