//! Swarm Relay Library
//!
//! Event routing core for multi-agent swarms:
//! - Typed events with priorities, payloads and delivery status
//! - Bounded priority queues with priority-aware eviction
//! - A four-band router (system, high, normal, low) with strict band order
//! - A subscription registry with wildcard topics, filters and a circuit
//!   breaker per subscription
//! - Dispatchers that fan events out concurrently, retry fully failed
//!   deliveries and hand exhausted events to a dead-letter sink
//!
//! # Usage
//!
//! ```ignore
//! use swarm_relay::{deliver_fn, DeliveryResult, Event, EventRelay, EventType};
//! use swarm_relay::{RelayConfig, SubscriptionFilters};
//!
//! let relay = EventRelay::new(RelayConfig::default())?;
//! relay.subscribe(
//!     "planner",
//!     ["task.*"],
//!     SubscriptionFilters::new(),
//!     deliver_fn(|event: Event| async move {
//!         println!("got {}", event.topic);
//!         DeliveryResult::ok()
//!     }),
//! )?;
//!
//! let handle = relay.start();
//! relay.publish(Event::new("task.created", EventType::TaskCreated, "worker-1"));
//! handle.shutdown().await;
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod queue;
pub mod registry;
pub mod relay;

pub use config::RelayConfig;
pub use dispatch::{
    deliver_fn, DeadLetterQueue, DeadLetterSink, Deliver, DeliveryResult, DispatchOutcome,
    DispatchState, DispatchStats, Dispatcher, LogDeadLetterSink, SharedDeliver,
};
pub use error::{RelayError, RelayResult};
pub use events::{DeliveryStatus, Event, EventId, EventPriority, EventType, Payload};
pub use queue::{Band, BandCapacities, BoundedPriorityQueue, MultiBandRouter, QueueStats};
pub use registry::{
    CircuitState, Subscription, SubscriptionFilters, SubscriptionId, SubscriptionRegistry,
    SubscriptionStats,
};
pub use relay::{EventRelay, RelayHandle, RelayStats, SharedEventRelay};
