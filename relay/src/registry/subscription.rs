//! Subscription definitions and filters

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::circuit_breaker::{CircuitBreaker, CircuitState, DEFAULT_FAILURE_THRESHOLD};
use super::pattern::TopicPattern;
use crate::dispatch::delivery::SharedDeliver;
use crate::error::{RelayError, RelayResult};
use crate::events::{Event, EventPriority, EventType};

/// Unique identifier for subscriptions
pub type SubscriptionId = String;

/// Optional filters narrowing a subscription. `None` means "match all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<HashSet<EventType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<EventPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<HashSet<String>>,
}

impl SubscriptionFilters {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event types
    pub fn types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    /// Only events at or above `priority`
    pub fn min_priority(mut self, priority: EventPriority) -> Self {
        self.min_priority = Some(priority);
        self
    }

    /// Filter by originating sources
    pub fn sources<S: Into<String>>(mut self, sources: impl IntoIterator<Item = S>) -> Self {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    /// Check if an event passes every present filter
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref types) = self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }

        if let Some(min) = self.min_priority {
            if event.priority < min {
                return false;
            }
        }

        if let Some(ref sources) = self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }

        true
    }
}

/// A consumer's declared interest plus its delivery health
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    pub subscriber_id: String,
    topics: Vec<TopicPattern>,
    pub filters: SubscriptionFilters,
    /// Ordering class for match results; higher classes are notified first
    pub priority: EventPriority,
    active: bool,
    health: CircuitBreaker,
    created_at: DateTime<Utc>,
    deliver: SharedDeliver,
}

impl Subscription {
    /// Create a subscription for `patterns`. Duplicate patterns collapse,
    /// keeping first-seen order.
    pub fn new<I, S>(
        subscriber_id: impl Into<String>,
        patterns: I,
        deliver: SharedDeliver,
    ) -> RelayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut topics: Vec<TopicPattern> = Vec::new();
        for pattern in patterns {
            let parsed = TopicPattern::parse(pattern.as_ref())?;
            if !topics.contains(&parsed) {
                topics.push(parsed);
            }
        }
        if topics.is_empty() {
            return Err(RelayError::EmptyPatterns);
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscriber_id: subscriber_id.into(),
            topics,
            filters: SubscriptionFilters::default(),
            priority: EventPriority::Normal,
            active: true,
            health: CircuitBreaker::new(DEFAULT_FAILURE_THRESHOLD),
            created_at: Utc::now(),
            deliver,
        })
    }

    pub fn with_filters(mut self, filters: SubscriptionFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.health.failure_threshold = threshold;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topics(&self) -> &[TopicPattern] {
        &self.topics
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn health(&self) -> &CircuitBreaker {
        &self.health
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn deliver(&self) -> &SharedDeliver {
        &self.deliver
    }

    /// Whether the event's topic matches any of this subscription's patterns
    pub fn matches_topic(&self, event: &Event) -> bool {
        self.topics.iter().any(|pattern| pattern.matches(&event.topic))
    }

    /// Full match: active, circuit closed, topic and filters
    pub fn matches(&self, event: &Event) -> bool {
        self.active
            && !self.health.is_open()
            && self.matches_topic(event)
            && self.filters.matches(event)
    }

    pub(crate) fn health_mut(&mut self) -> &mut CircuitBreaker {
        &mut self.health
    }

    pub(crate) fn deactivate(&mut self) {
        self.active = false;
    }

    /// Drop `pattern` from the topic list. Deactivates the subscription
    /// when no patterns remain. Returns whether the pattern was present.
    pub(crate) fn remove_pattern(&mut self, pattern: &str) -> bool {
        let before = self.topics.len();
        self.topics.retain(|p| p.as_str() != pattern);
        let removed = self.topics.len() != before;
        if self.topics.is_empty() {
            self.active = false;
        }
        removed
    }

    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            id: self.id.clone(),
            subscriber_id: self.subscriber_id.clone(),
            topics: self.topics.iter().map(|t| t.as_str().to_string()).collect(),
            priority: self.priority,
            active: self.active,
            circuit_state: self.health.state(),
            consecutive_failures: self.health.consecutive_failures(),
            failure_threshold: self.health.failure_threshold,
            total_delivered: self.health.total_successes(),
            total_failed: self.health.total_failures(),
            opened_at: self.health.opened_at(),
            last_delivery_at: self.health.last_delivery_at(),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subscriber_id", &self.subscriber_id)
            .field("topics", &self.topics)
            .field("filters", &self.filters)
            .field("priority", &self.priority)
            .field("active", &self.active)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a subscription for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub id: SubscriptionId,
    pub subscriber_id: String,
    pub topics: Vec<String>,
    pub priority: EventPriority,
    pub active: bool,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_delivered: u64,
    pub total_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::delivery::{deliver_fn, DeliveryResult};

    fn noop() -> SharedDeliver {
        deliver_fn(|_event: Event| async { DeliveryResult::ok() })
    }

    fn event(topic: &str) -> Event {
        Event::new(topic, EventType::TaskCompleted, "worker-1")
    }

    #[test]
    fn test_new_rejects_empty_and_invalid() {
        let empty: Vec<&str> = Vec::new();
        assert!(matches!(
            Subscription::new("sub", empty, noop()),
            Err(RelayError::EmptyPatterns)
        ));
        assert!(matches!(
            Subscription::new("sub", ["task.*ed"], noop()),
            Err(RelayError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_duplicate_patterns_collapse() {
        let sub = Subscription::new("sub", ["task.*", "agent.*", "task.*"], noop()).unwrap();
        let topics: Vec<&str> = sub.topics().iter().map(TopicPattern::as_str).collect();
        assert_eq!(topics, vec!["task.*", "agent.*"]);
    }

    #[test]
    fn test_event_filter() {
        let filters = SubscriptionFilters::new()
            .types([EventType::TaskCompleted, EventType::TaskFailed])
            .min_priority(EventPriority::Normal)
            .sources(["worker-1"]);

        assert!(filters.matches(&event("task.a")));
        assert!(!filters.matches(&event("task.a").with_priority(EventPriority::Low)));
        assert!(!filters.matches(&Event::new("task.a", EventType::TaskCreated, "worker-1")));
        assert!(!filters.matches(&Event::new("task.a", EventType::TaskCompleted, "worker-2")));
        assert!(SubscriptionFilters::new().matches(&event("anything")));
    }

    #[test]
    fn test_remove_last_pattern_deactivates() {
        let mut sub = Subscription::new("sub", ["task.*", "agent.*"], noop()).unwrap();
        assert!(sub.remove_pattern("task.*"));
        assert!(sub.is_active());
        assert!(!sub.remove_pattern("task.*"));
        assert!(sub.remove_pattern("agent.*"));
        assert!(!sub.is_active());
    }

    #[test]
    fn test_open_circuit_blocks_match() {
        let mut sub = Subscription::new("sub", ["*"], noop())
            .unwrap()
            .with_failure_threshold(1);
        assert!(sub.matches(&event("task.a")));
        sub.health_mut().record_failure();
        assert!(!sub.matches(&event("task.a")));
        assert!(sub.matches_topic(&event("task.a")));
    }
}
