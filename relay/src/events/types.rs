//! Event types for swarm routing
//!
//! An [`Event`] is created once by a producer and then only its delivery
//! bookkeeping (`delivery_status`, `delivery_attempts`) changes, and only
//! from inside this crate.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Unique identifier for events
pub type EventId = String;

/// Delivery priority. Higher values are delivered first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
    System = 4,
}

impl EventPriority {
    /// All priorities, highest first
    pub fn all() -> &'static [EventPriority] {
        &[
            EventPriority::System,
            EventPriority::Critical,
            EventPriority::High,
            EventPriority::Normal,
            EventPriority::Low,
        ]
    }

    /// Ordinal value used for comparisons
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for EventPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPriority::Low => write!(f, "low"),
            EventPriority::Normal => write!(f, "normal"),
            EventPriority::High => write!(f, "high"),
            EventPriority::Critical => write!(f, "critical"),
            EventPriority::System => write!(f, "system"),
        }
    }
}

/// Broad grouping of event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Agent,
    Task,
    Workflow,
    System,
    Custom,
}

/// Semantic event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStarted,
    AgentStopped,
    AgentError,
    TaskCreated,
    TaskAssigned,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    System,
    Custom,
}

impl EventType {
    /// Get the event type as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentStarted => "agent_started",
            EventType::AgentStopped => "agent_stopped",
            EventType::AgentError => "agent_error",
            EventType::TaskCreated => "task_created",
            EventType::TaskAssigned => "task_assigned",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::WorkflowStarted => "workflow_started",
            EventType::WorkflowCompleted => "workflow_completed",
            EventType::WorkflowFailed => "workflow_failed",
            EventType::System => "system",
            EventType::Custom => "custom",
        }
    }

    /// Lifecycle group this type belongs to
    pub fn category(&self) -> EventCategory {
        match self {
            EventType::AgentStarted | EventType::AgentStopped | EventType::AgentError => {
                EventCategory::Agent
            }
            EventType::TaskCreated
            | EventType::TaskAssigned
            | EventType::TaskStarted
            | EventType::TaskCompleted
            | EventType::TaskFailed => EventCategory::Task,
            EventType::WorkflowStarted
            | EventType::WorkflowCompleted
            | EventType::WorkflowFailed => EventCategory::Workflow,
            EventType::System => EventCategory::System,
            EventType::Custom => EventCategory::Custom,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery lifecycle of an event.
///
/// ```text
/// Pending → Delivered | Retrying | Failed | DeadLetter
/// Retrying → Retrying | Delivered | Failed | DeadLetter
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
    Retrying,
    DeadLetter,
}

impl DeliveryStatus {
    /// Whether no further status changes are allowed
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::DeadLetter
        )
    }

    /// Whether moving from `self` to `next` is forward progress
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        match self {
            Pending => next != Pending,
            Retrying => next != Pending,
            Delivered | Failed | DeadLetter => false,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::Retrying => write!(f, "retrying"),
            DeliveryStatus::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

/// A single payload value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Map(BTreeMap<String, PayloadValue>),
}

impl From<bool> for PayloadValue {
    fn from(v: bool) -> Self {
        PayloadValue::Bool(v)
    }
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        PayloadValue::Integer(v)
    }
}

impl From<i32> for PayloadValue {
    fn from(v: i32) -> Self {
        PayloadValue::Integer(v.into())
    }
}

impl From<u32> for PayloadValue {
    fn from(v: u32) -> Self {
        PayloadValue::Integer(v.into())
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        PayloadValue::Float(v)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        PayloadValue::String(v.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        PayloadValue::String(v)
    }
}

impl From<Payload> for PayloadValue {
    fn from(v: Payload) -> Self {
        PayloadValue::Map(v.0)
    }
}

/// Opaque key-value payload carried by an event.
///
/// Backed by a `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PayloadValue)> {
        self.0.iter()
    }
}

/// Queue ordering key: smaller keys are dequeued first.
///
/// Higher priority sorts first; equal priorities fall back to arrival
/// sequence so that ties are strictly FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderingKey(Reverse<EventPriority>, u64);

impl OrderingKey {
    pub fn new(priority: EventPriority, sequence: u64) -> Self {
        Self(Reverse(priority), sequence)
    }

    pub fn priority(&self) -> EventPriority {
        self.0 .0
    }

    pub fn sequence(&self) -> u64 {
        self.1
    }
}

/// Check whether `topic` matches `pattern`.
///
/// Supports exact matches, the universal pattern `*`, and whole-segment
/// wildcards (`task.*`). Pattern and topic must have the same number of
/// dot-separated segments; `*` never matches part of a segment.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" || pattern == topic {
        return true;
    }

    let mut pattern_segments = pattern.split('.');
    let mut topic_segments = topic.split('.');
    loop {
        match (pattern_segments.next(), topic_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(t)) if p == "*" || p == t => continue,
            _ => return false,
        }
    }
}

/// A routed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    /// Dot-segmented routing topic, e.g. `task.completed`
    pub topic: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub priority: EventPriority,
    /// Originator identifier
    pub source: String,
    /// Optional intended recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
    /// Links related events (e.g. all events of one workflow run)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Events past this instant are not delivered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    timestamp: DateTime<Utc>,
    // Dispatcher-owned; an inbound event always starts pending with no attempts.
    #[serde(skip_deserializing)]
    delivery_status: DeliveryStatus,
    #[serde(skip_deserializing)]
    delivery_attempts: u32,
}

impl Event {
    /// Create a new event with a fresh id and the current UTC time
    pub fn new(topic: impl Into<String>, event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: Self::new_id(),
            topic: topic.into(),
            event_type,
            priority: EventPriority::default(),
            source: source.into(),
            target: None,
            payload: Payload::new(),
            correlation_id: None,
            expires_at: None,
            timestamp: Utc::now(),
            delivery_status: DeliveryStatus::Pending,
            delivery_attempts: 0,
        }
    }

    /// Create a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.payload.insert(key, value);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn delivery_status(&self) -> DeliveryStatus {
        self.delivery_status
    }

    pub fn delivery_attempts(&self) -> u32 {
        self.delivery_attempts
    }

    /// Whether the event's topic matches `pattern` (see [`topic_matches`])
    pub fn matches_topic(&self, pattern: &str) -> bool {
        topic_matches(pattern, &self.topic)
    }

    /// Ordering key for a given arrival sequence number
    pub fn ordering_key(&self, sequence: u64) -> OrderingKey {
        OrderingKey::new(self.priority, sequence)
    }

    /// Whether the event expired at or before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub(crate) fn record_attempt(&mut self) -> u32 {
        self.delivery_attempts = self.delivery_attempts.saturating_add(1);
        self.delivery_attempts
    }

    /// Advance the delivery status. Regressions are refused and logged.
    pub(crate) fn advance_status(&mut self, next: DeliveryStatus) -> bool {
        if !self.delivery_status.can_advance_to(next) {
            warn!(
                event_id = %self.id,
                from = %self.delivery_status,
                to = %next,
                "Refusing delivery status regression"
            );
            return false;
        }
        self.delivery_status = next;
        true
    }
}
