//! Dispatcher — pulls events from the router and fans them out
//!
//! Each cycle fetches one event, matches it against the registry, delivers
//! to every matched subscription concurrently (each bounded by its own
//! timeout), then records outcomes: circuit breakers per subscription and
//! the event's retry/dead-letter fate.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::delivery::{DeliveryResult, SharedDeadLetterSink};
use super::state_machine::{DispatchState, DispatchStateMachine};
use crate::config::RelayConfig;
use crate::events::{DeliveryStatus, Event, EventId};
use crate::queue::MultiBandRouter;
use crate::registry::{Subscription, SubscriptionId, SubscriptionRegistry};

/// Timing and retry settings for a dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub fetch_timeout: Duration,
    pub delivery_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Option<Duration>,
}

impl From<&RelayConfig> for DispatchConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout(),
            delivery_timeout: config.delivery_timeout(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// Counters shared by every dispatcher of one relay
#[derive(Debug, Default)]
pub struct DispatchCounters {
    processed: AtomicU64,
    delivered: AtomicU64,
    vacuous: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    expired: AtomicU64,
    retry_rejected: AtomicU64,
    failed_deliveries: AtomicU64,
}

impl DispatchCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            processed: self.processed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            vacuous: self.vacuous.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            retry_rejected: self.retry_rejected.load(Ordering::Relaxed),
            failed_deliveries: self.failed_deliveries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatch counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Events taken from the router
    pub processed: u64,
    /// Events at least one subscriber accepted
    pub delivered: u64,
    /// Events no subscription matched
    pub vacuous: u64,
    /// Re-routes after a fully failed attempt
    pub retried: u64,
    pub dead_lettered: u64,
    pub expired: u64,
    /// Re-routes refused by admission control
    pub retry_rejected: u64,
    /// Individual failed subscription deliveries
    pub failed_deliveries: u64,
}

/// What happened to one fetched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered {
        event_id: EventId,
        succeeded: usize,
        failed: usize,
    },
    NoSubscribers {
        event_id: EventId,
    },
    Expired {
        event_id: EventId,
    },
    /// Re-routed, or scheduled for a delayed re-route whose admission is
    /// only known later (see `DispatchStats::retry_rejected`)
    Retrying {
        event_id: EventId,
        attempt: u32,
    },
    RetryRejected {
        event_id: EventId,
        attempt: u32,
    },
    DeadLettered {
        event_id: EventId,
        attempts: u32,
    },
}

/// A single dispatch worker
pub struct Dispatcher {
    name: String,
    router: Arc<MultiBandRouter>,
    registry: Arc<SubscriptionRegistry>,
    dead_letters: SharedDeadLetterSink,
    config: DispatchConfig,
    counters: Arc<DispatchCounters>,
    machine: DispatchStateMachine,
    retries: TaskTracker,
    retry_shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        name: impl Into<String>,
        router: Arc<MultiBandRouter>,
        registry: Arc<SubscriptionRegistry>,
        dead_letters: SharedDeadLetterSink,
        config: DispatchConfig,
    ) -> Self {
        Self {
            name: name.into(),
            router,
            registry,
            dead_letters,
            config,
            counters: Arc::new(DispatchCounters::default()),
            machine: DispatchStateMachine::new(),
            retries: TaskTracker::new(),
            retry_shutdown: CancellationToken::new(),
        }
    }

    /// Share counters with other dispatchers
    pub fn with_counters(mut self, counters: Arc<DispatchCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Track delayed retries in `tracker`. Cancelling `shutdown` routes any
    /// still-sleeping retry immediately.
    pub fn with_retries(mut self, tracker: TaskTracker, shutdown: CancellationToken) -> Self {
        self.retries = tracker;
        self.retry_shutdown = shutdown;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DispatchState {
        self.machine.current()
    }

    pub fn state_machine(&self) -> &DispatchStateMachine {
        &self.machine
    }

    pub fn counters(&self) -> &Arc<DispatchCounters> {
        &self.counters
    }

    fn transition(&mut self, to: DispatchState, reason: Option<&str>) {
        if let Err(e) = self.machine.advance(to, reason) {
            warn!(dispatcher = %self.name, error = %e, "Dispatch state machine rejected transition");
        }
    }

    /// Run until `shutdown` is cancelled. An event already being delivered
    /// is finished before stopping.
    pub async fn run(mut self, shutdown: CancellationToken) -> Self {
        info!(dispatcher = %self.name, "Dispatcher started");
        let router = self.router.clone();

        while !shutdown.is_cancelled() {
            self.transition(DispatchState::Fetching, None);
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = router.next(self.config.fetch_timeout) => event,
            };

            match next {
                Some(event) => {
                    self.process(event).await;
                }
                None => self.transition(DispatchState::Idle, Some("fetch timeout")),
            }
        }

        if let Err(e) = self.machine.stop("shutdown") {
            warn!(dispatcher = %self.name, error = %e, "Dispatcher already stopped");
        }
        info!(
            dispatcher = %self.name,
            cycles = self.machine.cycle(),
            "Dispatcher stopped"
        );
        self
    }

    /// Run one fetch cycle. Returns `None` when nothing arrived in `timeout`.
    pub async fn dispatch_once(&mut self, timeout: Duration) -> Option<DispatchOutcome> {
        self.transition(DispatchState::Fetching, None);
        match self.router.next(timeout).await {
            Some(event) => Some(self.process(event).await),
            None => {
                self.transition(DispatchState::Idle, Some("fetch timeout"));
                None
            }
        }
    }

    async fn process(&mut self, mut event: Event) -> DispatchOutcome {
        self.transition(DispatchState::Matching, None);
        DispatchCounters::bump(&self.counters.processed);
        let event_id = event.id().to_string();

        if event.is_expired_at(Utc::now()) {
            event.advance_status(DeliveryStatus::Failed);
            DispatchCounters::bump(&self.counters.expired);
            debug!(dispatcher = %self.name, event_id = %event_id, "Event expired before delivery");
            self.transition(DispatchState::Idle, Some("expired"));
            return DispatchOutcome::Expired { event_id };
        }

        let matched = self.registry.match_event(&event);
        if matched.is_empty() {
            event.advance_status(DeliveryStatus::Delivered);
            DispatchCounters::bump(&self.counters.vacuous);
            debug!(dispatcher = %self.name, event_id = %event_id, "No subscribers for event");
            self.transition(DispatchState::Idle, Some("no subscribers"));
            return DispatchOutcome::NoSubscribers { event_id };
        }

        self.transition(DispatchState::Delivering, None);
        let results = self.deliver_all(&event, &matched).await;

        self.transition(DispatchState::Recording, None);
        let outcome = self.record(event, results);
        self.transition(DispatchState::Idle, None);
        outcome
    }

    /// Deliver to every subscription concurrently; one slow or failing
    /// consumer never affects the others.
    async fn deliver_all(
        &self,
        event: &Event,
        matched: &[Subscription],
    ) -> Vec<(SubscriptionId, DeliveryResult)> {
        let timeout = self.config.delivery_timeout;
        let deliveries = matched.iter().map(|subscription| async move {
            let delivery = AssertUnwindSafe(subscription.deliver().deliver(event)).catch_unwind();
            let result = match tokio::time::timeout(timeout, delivery).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => DeliveryResult::failed("delivery callback panicked"),
                Err(_) => DeliveryResult::failed(format!(
                    "delivery timed out after {}ms",
                    timeout.as_millis()
                )),
            };
            (subscription.id().to_string(), result)
        });
        join_all(deliveries).await
    }

    fn record(
        &mut self,
        mut event: Event,
        results: Vec<(SubscriptionId, DeliveryResult)>,
    ) -> DispatchOutcome {
        let attempt = event.record_attempt();
        let event_id = event.id().to_string();
        let mut succeeded = 0;
        let mut failed = 0;

        for (subscription_id, result) in &results {
            let recorded = if result.success {
                succeeded += 1;
                self.registry.record_success(subscription_id)
            } else {
                failed += 1;
                DispatchCounters::bump(&self.counters.failed_deliveries);
                warn!(
                    event_id = %event_id,
                    subscription_id = %subscription_id,
                    attempt,
                    error = result.error.as_deref().unwrap_or("unspecified"),
                    "Delivery failed"
                );
                self.registry.record_failure(subscription_id).map(|_| ())
            };
            if let Err(e) = recorded {
                // Purged while the delivery was in flight.
                debug!(subscription_id = %subscription_id, error = %e, "Outcome not recorded");
            }
        }

        if succeeded > 0 {
            event.advance_status(DeliveryStatus::Delivered);
            DispatchCounters::bump(&self.counters.delivered);
            return DispatchOutcome::Delivered {
                event_id,
                succeeded,
                failed,
            };
        }

        if attempt <= self.config.max_retries {
            event.advance_status(DeliveryStatus::Retrying);
            DispatchCounters::bump(&self.counters.retried);
            debug!(event_id = %event_id, attempt, "Re-routing failed event");
            return if self.reroute(event) {
                DispatchOutcome::Retrying { event_id, attempt }
            } else {
                DispatchOutcome::RetryRejected { event_id, attempt }
            };
        }

        event.advance_status(DeliveryStatus::DeadLetter);
        DispatchCounters::bump(&self.counters.dead_lettered);
        self.dead_letters.on_dead_letter(&event);
        DispatchOutcome::DeadLettered {
            event_id,
            attempts: attempt,
        }
    }

    /// Put a failed event back into the router, immediately or after the
    /// configured delay. Delayed re-routes always report `true`.
    fn reroute(&self, event: Event) -> bool {
        let Some(delay) = self.config.retry_delay else {
            return route_retry(&self.router, &self.counters, event).is_none();
        };

        let router = self.router.clone();
        let counters = self.counters.clone();
        let shutdown = self.retry_shutdown.clone();
        self.retries.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    debug!(event_id = %event.id(), "Shutting down, routing delayed retry now");
                }
            }
            route_retry(&router, &counters, event);
        });
        true
    }
}

/// Route a retry. A refused event is marked failed and handed back.
fn route_retry(router: &MultiBandRouter, counters: &DispatchCounters, event: Event) -> Option<Event> {
    let mut event = router.try_route(event).err()?;
    event.advance_status(DeliveryStatus::Failed);
    DispatchCounters::bump(&counters.retry_rejected);
    warn!(
        event_id = %event.id(),
        attempts = event.delivery_attempts(),
        status = %event.delivery_status(),
        "Retry rejected by admission control, event dropped"
    );
    Some(event)
}
