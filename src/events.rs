//! Typed pub-sub event bus.
//!
//! Grounded on `proxy/breakpoints.rs`'s `BREAKPOINT_EVENTS` broadcast
//! sender, widened from one topic to the full set the proxy, interception
//! engine and flow engine need to push to the UI layer. At-most-once
//! delivery per subscriber; a slow subscriber drops the oldest buffered
//! events rather than blocking publishers (`tokio::sync::broadcast`'s
//! lagging-receiver behavior).

use crate::models::{ExecutionResult, HTTPTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutedPayload {
    pub flow_id: Uuid,
    pub current_step_index: usize,
    pub results: Vec<ExecutionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzUpdatePayload {
    pub step_id: Uuid,
    pub fuzz_results: Vec<crate::models::FuzzResult>,
    pub is_fuzzing: bool,
}

/// The full set of named topics this crate publishes, plus the
/// out-of-scope collaborator topics (`api-collection:*`, `project:*`)
/// passed through verbatim so this crate doesn't need to know their
/// payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload", rename_all = "snake_case")]
pub enum Event {
    NewTransaction(Box<HTTPTransaction>),
    #[serde(rename = "flow:stepExecuted")]
    FlowStepExecuted(StepExecutedPayload),
    #[serde(rename = "flow:fuzzUpdate")]
    FlowFuzzUpdate(FuzzUpdatePayload),
    #[serde(rename = "intercept:pending_changed")]
    InterceptPendingChanged,
    #[serde(rename = "api-collection")]
    ApiCollection { kind: String, payload: Value },
    #[serde(rename = "project:loaded")]
    ProjectLoaded(Value),
    #[serde(rename = "project:created")]
    ProjectCreated(Value),
}

/// Process-wide broadcast channel. Cloning is cheap (an `Arc`-backed
/// sender handle); every subscriber gets its own `Receiver`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of receivers it reached; a
    /// publish with zero subscribers is not an error (nobody's listening
    /// yet is normal at startup).
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(Event::InterceptPendingChanged);

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Event::InterceptPendingChanged));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_a_copy() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(Event::InterceptPendingChanged);

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
