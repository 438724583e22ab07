//! JSON-RPC request/response correlation
//!
//! Responses arrive asynchronously over SSE in any order. The dispatcher
//! maps request ids to single-shot channels: register before sending, wait
//! with a timeout, and the waiter is removed on exactly one path. A response
//! arriving after its waiter expired is dropped, never a panic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};

use super::protocol::McpMessage;

/// Correlates JSON-RPC responses to pending requests by id
#[derive(Default)]
pub struct Dispatcher {
    waiters: Mutex<HashMap<String, oneshot::Sender<McpMessage>>>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. Must happen before the request is sent.
    pub fn register(&self, id: &str) -> oneshot::Receiver<McpMessage> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .expect("dispatcher lock")
            .insert(id.to_string(), tx);
        rx
    }

    /// Deliver a response to its waiter. Returns `false` (and drops the
    /// message) when no waiter exists, e.g. after a timeout.
    pub fn deliver(&self, message: McpMessage) -> bool {
        let Some(id) = message.id_key() else {
            return false;
        };
        let waiter = self.waiters.lock().expect("dispatcher lock").remove(&id);
        match waiter {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                debug!(id = %id, "Response without waiter dropped");
                false
            }
        }
    }

    /// Remove a waiter without delivering anything.
    pub fn purge(&self, id: &str) {
        self.waiters.lock().expect("dispatcher lock").remove(id);
    }

    /// Wait for the response registered under `id`, whichever comes first:
    /// delivery, cancellation, or timeout. The waiter is removed on every
    /// exit path.
    pub async fn wait(
        &self,
        id: &str,
        rx: oneshot::Receiver<McpMessage>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<McpMessage> {
        tokio::select! {
            message = rx => {
                message.map_err(|_| Error::Internal(format!("waiter for '{}' dropped", id)))
            }
            _ = cancel.cancelled() => {
                self.purge(id);
                Err(Error::Canceled)
            }
            _ = tokio::time::sleep(timeout) => {
                self.purge(id);
                Err(Error::RpcTimeout(format!(
                    "no response for '{}' within {:?}",
                    id, timeout
                )))
            }
        }
    }

    /// Number of outstanding waiters
    pub fn pending(&self) -> usize {
        self.waiters.lock().expect("dispatcher lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn response(id: &str) -> McpMessage {
        McpMessage::response(
            Some(Value::String(id.to_string())),
            serde_json::json!({ "for": id }),
        )
    }

    #[tokio::test]
    async fn delivery_resolves_the_waiter() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.register("a-1");
        assert!(dispatcher.deliver(response("a-1")));

        let message = dispatcher
            .wait("a-1", rx, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(message.result.unwrap()["for"], "a-1");
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_own_waiters() {
        let dispatcher = Dispatcher::new();
        let rx_x = dispatcher.register("x");
        let rx_y = dispatcher.register("y");

        // Responses arrive in reverse order.
        assert!(dispatcher.deliver(response("y")));
        assert!(dispatcher.deliver(response("x")));

        let cancel = CancellationToken::new();
        let x = dispatcher
            .wait("x", rx_x, Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        let y = dispatcher
            .wait("y", rx_y, Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(x.result.unwrap()["for"], "x");
        assert_eq!(y.result.unwrap()["for"], "y");
    }

    #[tokio::test]
    async fn timeout_purges_the_waiter_and_late_delivery_is_dropped() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.register("slow");

        let err = dispatcher
            .wait(
                "slow",
                rx,
                Duration::from_millis(20),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RpcTimeout(_)));
        assert_eq!(dispatcher.pending(), 0);

        // The response shows up after the timeout: dropped, no panic.
        assert!(!dispatcher.deliver(response("slow")));
    }

    #[tokio::test]
    async fn cancellation_purges_the_waiter() {
        let dispatcher = Dispatcher::new();
        let rx = dispatcher.register("c");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = dispatcher
            .wait("c", rx, Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Canceled));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn delivery_without_waiter_is_a_noop() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.deliver(response("ghost")));
    }

    #[test]
    fn responses_without_id_are_dropped() {
        let dispatcher = Dispatcher::new();
        let message = McpMessage::notification("ping", None);
        assert!(!dispatcher.deliver(message));
    }
}
