//! MCP SSE transport client
//!
//! One client per configured remote server. A long-lived SSE subscription to
//! `<base>/sse` carries JSON-RPC traffic from the server: responses go to
//! the dispatcher, notifications to the per-server handler (whose goals are
//! queued for a standalone agent), pings are dropped silently. Outbound
//! requests POST to `<base>/message` and either take the HTTP response body
//! directly (when it id-matches) or block on the dispatcher until the
//! response shows up on the SSE stream.
//!
//! The subscription reconnects forever on transient failure, with a jittered
//! delay bounded well under ten seconds, until the client is stopped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::McpServerConfig;
use crate::error::{Error, Result};

use super::dispatcher::Dispatcher;
use super::handlers::NotificationHandler;
use super::protocol::{CallToolResult, McpMessage, McpToolDef, PROTOCOL_VERSION};

/// Default timeout for a JSON-RPC response
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before reconnecting a dropped subscription
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connection state of one SSE client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

/// SSE + JSON-RPC client for one remote MCP server
pub struct SseClient {
    name: String,
    config: McpServerConfig,
    http: reqwest::Client,
    dispatcher: Arc<Dispatcher>,
    handler: Arc<dyn NotificationHandler>,
    goals: mpsc::Sender<String>,
    cancel: CancellationToken,
    reconnect_delay: Duration,
    rpc_timeout: Duration,
    state: Mutex<ClientState>,
}

impl SseClient {
    /// Create a client for one server configuration
    pub fn new(
        name: impl Into<String>,
        config: McpServerConfig,
        dispatcher: Arc<Dispatcher>,
        handler: Arc<dyn NotificationHandler>,
        goals: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        SseClient {
            name: name.into(),
            config,
            http: reqwest::Client::new(),
            dispatcher,
            handler,
            goals,
            cancel,
            reconnect_delay: RECONNECT_DELAY,
            rpc_timeout: RPC_TIMEOUT,
            state: Mutex::new(ClientState::Disconnected),
        }
    }

    /// Override the reconnect delay (tests)
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override the response timeout (tests)
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Server name this client is tied to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current connection state
    pub fn state(&self) -> ClientState {
        *self.state.lock().expect("state lock")
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().expect("state lock") = state;
    }

    /// The SSE subscription URL: `<base>/sse`, appended when missing.
    pub fn sse_url(base: &str) -> String {
        let trimmed = base.trim_end_matches('/');
        if trimmed.ends_with("/sse") {
            trimmed.to_string()
        } else {
            format!("{}/sse", trimmed)
        }
    }

    /// The outbound POST URL: a trailing `/sse` is replaced by `/message`,
    /// otherwise `/message` is appended.
    pub fn message_url(base: &str) -> String {
        let trimmed = base.trim_end_matches('/');
        match trimmed.strip_suffix("/sse") {
            Some(prefix) => format!("{}/message", prefix),
            None => format!("{}/message", trimmed),
        }
    }

    /// Stop the client
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run the subscription until stopped, reconnecting on failure.
    pub async fn run(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ClientState::Connecting);
            match self.subscribe_once().await {
                Ok(()) => debug!(server = %self.name, "SSE stream closed"),
                Err(e) => warn!(server = %self.name, "SSE stream error: {}", e),
            }
            self.set_state(ClientState::Disconnected);

            if self.cancel.is_cancelled() {
                break;
            }

            // Jittered delay, bounded so reconnection stays under ten seconds
            let jitter_range = (self.reconnect_delay.as_millis() as u64 / 2).max(1);
            let jitter = Duration::from_millis(rand::random::<u64>() % jitter_range);
            let delay = (self.reconnect_delay + jitter).min(Duration::from_secs(10));
            debug!(server = %self.name, "Reconnecting in {:?}", delay);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.set_state(ClientState::Stopped);
        info!(server = %self.name, "SSE client stopped");
    }

    /// One subscription attempt: consume events until the stream ends.
    async fn subscribe_once(&self) -> Result<()> {
        let url = Self::sse_url(&self.config.url);
        let mut request = self.http.get(&url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let mut stream = EventSource::new(request)
            .map_err(|e| Error::Protocol(format!("failed to open SSE stream: {}", e)))?;

        debug!(server = %self.name, url = %url, "SSE subscription opening");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    stream.close();
                    return Ok(());
                }
                event = stream.next() => match event {
                    None => return Ok(()),
                    Some(Ok(Event::Open)) => {
                        info!(server = %self.name, "SSE subscribed");
                        self.set_state(ClientState::Subscribed);
                    }
                    Some(Ok(Event::Message(message))) => {
                        if message.event != "messages" && message.event != "message" {
                            debug!(server = %self.name, event = %message.event, "Ignoring SSE channel");
                            continue;
                        }
                        match serde_json::from_str::<McpMessage>(&message.data) {
                            Ok(parsed) => self.route(parsed),
                            // Malformed payloads are logged and dropped; the
                            // subscription stays up.
                            Err(e) => warn!(
                                server = %self.name,
                                "Malformed MCP message dropped: {} (raw: {})",
                                e,
                                &message.data[..message.data.len().min(200)]
                            ),
                        }
                    }
                    Some(Err(e)) => {
                        stream.close();
                        return Err(Error::Protocol(e.to_string()));
                    }
                }
            }
        }
    }

    /// Route one inbound message: responses to the dispatcher, notifications
    /// to the handler, pings nowhere.
    pub(crate) fn route(&self, message: McpMessage) {
        if message.is_response() {
            if !self.dispatcher.deliver(message) {
                debug!(server = %self.name, "Unmatched response dropped");
            }
            return;
        }

        if message.is_notification() {
            if message.method.as_deref() == Some("ping") {
                return;
            }
            if let Some(goal) = self.handler.handle(&self.name, &message) {
                if self.goals.try_send(goal).is_err() {
                    warn!(server = %self.name, "Goal queue full, notification dropped");
                }
            }
            return;
        }

        debug!(server = %self.name, "Ignoring server-to-client request");
    }

    /// Issue a JSON-RPC request. The response is taken from the HTTP body
    /// when it id-matches, otherwise awaited on the SSE stream.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<McpMessage> {
        let id = format!(
            "{}-{}-{}",
            self.name,
            method.replace('/', "_"),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let rx = self.dispatcher.register(&id);
        let request = McpMessage::request(id.clone(), method, params);

        let mut builder = self.http.post(Self::message_url(&self.config.url));
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }

        let response = match builder.json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                self.dispatcher.purge(&id);
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.dispatcher.purge(&id);
            return Err(Error::Protocol(format!(
                "POST {} returned {}",
                Self::message_url(&self.config.url),
                status
            )));
        }

        // Fast path: some servers answer synchronously in the POST body.
        let body = response.text().await.unwrap_or_default();
        if !body.trim().is_empty() {
            if let Ok(message) = serde_json::from_str::<McpMessage>(&body) {
                if message.id_key().as_deref() == Some(id.as_str()) {
                    self.dispatcher.purge(&id);
                    return Ok(message);
                }
            }
        }

        self.dispatcher
            .wait(&id, rx, self.rpc_timeout, &self.cancel)
            .await
    }

    /// Initialize the MCP session and announce readiness.
    pub async fn initialize(&self) -> Result<()> {
        let message = self
            .call(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": crate::NAME,
                        "version": crate::VERSION,
                    }
                })),
            )
            .await?;

        if let Some(error) = message.error {
            return Err(Error::Protocol(format!("initialize failed: {}", error)));
        }

        // Readiness notification gets no response; failures are non-fatal.
        let notification = McpMessage::notification("initialized", None);
        let mut builder = self.http.post(Self::message_url(&self.config.url));
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }
        if let Err(e) = builder.json(&notification).send().await {
            warn!(server = %self.name, "initialized notification failed: {}", e);
        }
        Ok(())
    }

    /// List the server's tools
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let message = self.call("tools/list", None).await?;
        if let Some(error) = message.error {
            return Err(Error::Protocol(format!("tools/list failed: {}", error)));
        }
        let result = message.result.unwrap_or_default();
        let tools: Vec<McpToolDef> = result
            .get("tools")
            .and_then(|tools| serde_json::from_value(tools.clone()).ok())
            .unwrap_or_default();
        debug!(server = %self.name, count = tools.len(), "Listed remote tools");
        Ok(tools)
    }

    /// Call a tool on the server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let message = self
            .call(
                "tools/call",
                Some(serde_json::json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        if let Some(error) = message.error {
            return Err(Error::Protocol(format!("tools/call failed: {}", error)));
        }
        let result = message.result.unwrap_or_default();
        serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("malformed tools/call result: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handlers::DefaultNotificationHandler;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[test]
    fn sse_url_derivation() {
        assert_eq!(
            SseClient::sse_url("http://host:1234"),
            "http://host:1234/sse"
        );
        assert_eq!(
            SseClient::sse_url("http://host:1234/"),
            "http://host:1234/sse"
        );
        assert_eq!(
            SseClient::sse_url("http://host:1234/sse"),
            "http://host:1234/sse"
        );
    }

    #[test]
    fn message_url_derivation() {
        assert_eq!(
            SseClient::message_url("http://host:1234"),
            "http://host:1234/message"
        );
        assert_eq!(
            SseClient::message_url("http://host:1234/sse"),
            "http://host:1234/message"
        );
    }

    fn client_for(url: &str) -> (SseClient, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let client = SseClient::new(
            "market",
            McpServerConfig {
                url: url.to_string(),
                headers: Default::default(),
            },
            Arc::new(Dispatcher::new()),
            Arc::new(DefaultNotificationHandler),
            tx,
            CancellationToken::new(),
        );
        (client, rx)
    }

    #[tokio::test]
    async fn route_delivers_responses_to_waiters() {
        let (client, _rx) = client_for("http://unused");
        let waiter = client.dispatcher.register("market-x-1");

        client.route(McpMessage::response(
            Some(Value::String("market-x-1".into())),
            serde_json::json!({ "ok": true }),
        ));

        let message = client
            .dispatcher
            .wait(
                "market-x-1",
                waiter,
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(message.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn route_turns_notifications_into_goals() {
        let (client, mut rx) = client_for("http://unused");

        client.route(McpMessage::notification(
            "price/update",
            Some(serde_json::json!({ "symbol": "BTCUSD" })),
        ));

        let goal = rx.recv().await.unwrap();
        assert!(goal.contains("BTCUSD"));
    }

    #[tokio::test]
    async fn ping_notifications_are_silently_dropped() {
        let (client, mut rx) = client_for("http://unused");
        client.route(McpMessage::notification(
            "ping",
            Some(serde_json::json!({ "symbol": "SHOULD_NOT_APPEAR" })),
        ));
        assert!(rx.try_recv().is_err());
    }

    /// Echoes the request id back with a canned tools/list result.
    struct EchoToolsList;

    impl Respond for EchoToolsList {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let message: McpMessage = serde_json::from_slice(&request.body).unwrap();
            let response = McpMessage::response(
                message.id,
                serde_json::json!({
                    "tools": [
                        { "name": "remote_echo", "description": "Echo on the server" }
                    ]
                }),
            );
            ResponseTemplate::new(200).set_body_json(response)
        }
    }

    #[tokio::test]
    async fn call_takes_the_id_matched_http_body_fast_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(EchoToolsList)
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server.uri());
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "remote_echo");
        // The waiter was purged by the fast path.
        assert_eq!(client.dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn call_without_response_times_out_and_purges() {
        let server = MockServer::start().await;
        // Accepted but never answered: the response would come over SSE.
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let (client, _rx) = client_for(&server.uri());
        let client = client.with_rpc_timeout(Duration::from_millis(50));

        let err = client.call("tools/list", None).await.unwrap_err();
        assert!(matches!(err, Error::RpcTimeout(_)));
        assert_eq!(client.dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn subscription_reconnects_after_stream_end() {
        let server = MockServer::start().await;
        let notification = r#"{"jsonrpc":"2.0","method":"price/update","params":{"symbol":"BTCUSD"}}"#;
        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(
                    format!("event: messages\ndata: {}\n\n", notification),
                    "text/event-stream",
                ),
            )
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let client = Arc::new(
            SseClient::new(
                "market",
                McpServerConfig {
                    url: server.uri(),
                    headers: Default::default(),
                },
                Arc::new(Dispatcher::new()),
                Arc::new(DefaultNotificationHandler),
                tx,
                cancel.clone(),
            )
            .with_reconnect_delay(Duration::from_millis(50)),
        );

        let runner = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.run().await })
        };

        // One goal per connection; a second goal proves the reconnect.
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("first goal in time")
            .unwrap();
        assert!(first.contains("BTCUSD"));
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("second goal in time")
            .unwrap();
        assert!(second.contains("BTCUSD"));

        cancel.cancel();
        runner.await.unwrap();
        assert_eq!(client.state(), ClientState::Stopped);
    }
}
