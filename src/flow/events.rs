//! Per-execution event bus
//!
//! Every execution owns one bus. Events are stamped with a monotone `seq` at
//! publication and fanned out to per-subscriber bounded queues; a slow
//! subscriber loses its oldest queued events (counted, never blocking the
//! publisher). New subscribers are seeded with the bus's bounded history so
//! a mid-flight subscriber still sees every retained event in order. The
//! terminal transition closes the bus; late subscribers get a closed stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::warn;

/// Kinds of workflow events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventType {
    FlowStarted,
    FlowCompleted,
    FlowFailed,
    FlowCanceled,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskSkipped,
}

impl FlowEventType {
    /// Whether this event ends the execution's stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowEventType::FlowCompleted | FlowEventType::FlowFailed | FlowEventType::FlowCanceled
        )
    }
}

/// One event in an execution's stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: FlowEventType,
    /// Monotone sequence number within the execution
    pub seq: u64,
    /// Publication timestamp
    pub timestamp: DateTime<Utc>,
    /// Owning execution
    pub execution_id: String,
    /// Task this event concerns, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Structured payload, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

struct SubscriberState {
    queue: Mutex<VecDeque<FlowEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

struct BusInner {
    history: VecDeque<FlowEvent>,
    subscribers: Vec<Arc<SubscriberState>>,
    closed: bool,
    next_seq: u64,
    dropped: u64,
}

/// Bounded publish/subscribe bus for one execution
pub struct EventBus {
    execution_id: String,
    capacity: usize,
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Create a bus with per-subscriber buffer `capacity`
    pub fn new(execution_id: impl Into<String>, capacity: usize) -> Self {
        EventBus {
            execution_id: execution_id.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(BusInner {
                history: VecDeque::new(),
                subscribers: Vec::new(),
                closed: false,
                next_seq: 0,
                dropped: 0,
            }),
        }
    }

    /// Publish an event to every subscriber (and the history ring).
    pub fn publish(
        &self,
        event_type: FlowEventType,
        task_id: Option<String>,
        message: impl Into<String>,
        payload: Option<Value>,
    ) {
        let mut inner = self.inner.lock().expect("event bus lock");
        if inner.closed {
            warn!(execution_id = %self.execution_id, "Publish on closed event bus ignored");
            return;
        }

        let event = FlowEvent {
            event_type,
            seq: inner.next_seq,
            timestamp: Utc::now(),
            execution_id: self.execution_id.clone(),
            task_id,
            message: message.into(),
            payload,
        };
        inner.next_seq += 1;

        if inner.history.len() == self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(event.clone());

        let mut dropped = 0u64;
        for subscriber in &inner.subscribers {
            let mut queue = subscriber.queue.lock().expect("subscriber queue lock");
            if queue.len() == self.capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(event.clone());
            drop(queue);
            subscriber.notify.notify_one();
        }
        inner.dropped += dropped;
    }

    /// Subscribe to the stream. A subscriber joining mid-flight is seeded
    /// with the retained history; one joining after close gets an already
    /// closed stream.
    pub fn subscribe(&self) -> EventStream {
        let mut inner = self.inner.lock().expect("event bus lock");
        let state = Arc::new(SubscriberState {
            queue: Mutex::new(if inner.closed {
                VecDeque::new()
            } else {
                inner.history.clone()
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(inner.closed),
        });
        if !inner.closed {
            inner.subscribers.push(Arc::clone(&state));
        }
        EventStream { state }
    }

    /// Close the bus. Subscribers drain their queues, then see end-of-stream.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("event bus lock");
        if inner.closed {
            return;
        }
        inner.closed = true;
        for subscriber in &inner.subscribers {
            subscriber.closed.store(true, Ordering::SeqCst);
            subscriber.notify.notify_one();
        }
    }

    /// Events dropped to subscriber backpressure so far
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("event bus lock").dropped
    }
}

/// A subscriber's view of the event stream
pub struct EventStream {
    state: Arc<SubscriberState>,
}

impl EventStream {
    /// Receive the next event, or `None` once the bus is closed and drained.
    pub async fn recv(&mut self) -> Option<FlowEvent> {
        loop {
            let notified = self.state.notify.notified();
            if let Some(event) = self.state.queue.lock().expect("subscriber queue lock").pop_front()
            {
                return Some(event);
            }
            if self.state.closed.load(Ordering::SeqCst) {
                // Re-check: a publish may have raced the close flag.
                return self
                    .state
                    .queue
                    .lock()
                    .expect("subscriber queue lock")
                    .pop_front();
            }
            notified.await;
        }
    }

    /// Drain the stream to completion, collecting every event.
    pub async fn collect(mut self) -> Vec<FlowEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            events.push(event);
        }
        events
    }
}
