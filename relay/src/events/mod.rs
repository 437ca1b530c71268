//! Event model for swarm routing
//!
//! Events are produced by workers and schedulers, buffered by the
//! [`queue`](crate::queue) bands, and fanned out to subscribers by the
//! [`dispatch`](crate::dispatch) loop.
//!
//! # Usage
//!
//! ```ignore
//! use swarm_relay::events::{Event, EventPriority, EventType};
//!
//! let event = Event::new("task.completed", EventType::TaskCompleted, "worker-7")
//!     .with_priority(EventPriority::High)
//!     .with_payload("task_id", "task-42");
//!
//! assert!(event.matches_topic("task.*"));
//! ```

pub mod types;

pub use types::{
    topic_matches, DeliveryStatus, Event, EventCategory, EventId, EventPriority, EventType,
    OrderingKey, Payload, PayloadValue,
};
