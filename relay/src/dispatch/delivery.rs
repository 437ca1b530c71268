//! Delivery callbacks and dead-letter sinks
//!
//! Consumers implement [`Deliver`] (or wrap a closure with [`deliver_fn`]).
//! Events that exhaust their retries are handed once to a [`DeadLetterSink`].

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::Event;

/// Outcome reported by a delivery callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Consumer-side delivery callback.
///
/// Implementations must return within the dispatcher's delivery timeout;
/// a timeout counts as a failure.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, event: &Event) -> DeliveryResult;
}

/// Shared reference to a delivery callback
pub type SharedDeliver = Arc<dyn Deliver>;

/// Adapter turning an async closure into a [`Deliver`]
pub struct DeliverFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Deliver for DeliverFn<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = DeliveryResult> + Send + 'static,
{
    async fn deliver(&self, event: &Event) -> DeliveryResult {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a shared delivery callback
pub fn deliver_fn<F, Fut>(f: F) -> SharedDeliver
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DeliveryResult> + Send + 'static,
{
    Arc::new(DeliverFn { f })
}

/// Receives events that exhausted all delivery retries
#[cfg_attr(test, mockall::automock)]
pub trait DeadLetterSink: Send + Sync {
    fn on_dead_letter(&self, event: &Event);
}

/// Shared reference to a dead-letter sink
pub type SharedDeadLetterSink = Arc<dyn DeadLetterSink>;

/// Default sink: logs each dead letter
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeadLetterSink;

impl DeadLetterSink for LogDeadLetterSink {
    fn on_dead_letter(&self, event: &Event) {
        warn!(
            event_id = %event.id(),
            topic = %event.topic,
            priority = %event.priority,
            attempts = event.delivery_attempts(),
            "Event dead-lettered"
        );
    }
}

/// Bounded in-memory dead-letter store; the oldest entry is dropped first
pub struct DeadLetterQueue {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a shared reference to this queue
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn events(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the stored dead letters, oldest first
    pub fn snapshot(&self) -> Vec<Event> {
        self.events().iter().cloned().collect()
    }

    /// Take every stored dead letter, oldest first
    pub fn drain(&self) -> Vec<Event> {
        self.events().drain(..).collect()
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn on_dead_letter(&self, event: &Event) {
        LogDeadLetterSink.on_dead_letter(event);
        if self.capacity == 0 {
            return;
        }
        let mut events = self.events();
        if events.len() >= self.capacity {
            if let Some(dropped) = events.pop_front() {
                warn!(event_id = %dropped.id(), "Dead-letter queue full, dropping oldest");
            }
        }
        events.push_back(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    #[tokio::test]
    async fn test_deliver_fn_adapter() {
        let deliver = deliver_fn(|event: Event| async move {
            if event.topic == "task.ok" {
                DeliveryResult::ok()
            } else {
                DeliveryResult::failed("unexpected topic")
            }
        });

        let ok = Event::new("task.ok", EventType::TaskCompleted, "test");
        let bad = Event::new("task.bad", EventType::TaskFailed, "test");
        assert_eq!(deliver.deliver(&ok).await, DeliveryResult::ok());
        assert!(!deliver.deliver(&bad).await.success);
    }

    #[test]
    fn test_dead_letter_queue_bounded() {
        let dlq = DeadLetterQueue::new(2);
        for topic in ["a", "b", "c"] {
            dlq.on_dead_letter(&Event::new(topic, EventType::Custom, "test"));
        }

        let topics: Vec<String> = dlq.snapshot().into_iter().map(|e| e.topic).collect();
        assert_eq!(topics, vec!["b", "c"]);
        assert_eq!(dlq.drain().len(), 2);
        assert!(dlq.is_empty());
    }
}
