//! Event relay — the producer and consumer facing surface
//!
//! [`EventRelay`] ties a [`MultiBandRouter`], a [`SubscriptionRegistry`] and
//! a dead-letter sink together. Producers call [`EventRelay::publish`];
//! consumers call [`EventRelay::subscribe`]; [`EventRelay::start`] spawns
//! the dispatcher pool that moves events between them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::dispatch::{
    DispatchConfig, DispatchCounters, DispatchState, DispatchStats, Dispatcher,
    LogDeadLetterSink, SharedDeadLetterSink, SharedDeliver,
};
use crate::error::RelayResult;
use crate::events::Event;
use crate::queue::{MultiBandRouter, QueueStats};
use crate::registry::{
    Subscription, SubscriptionFilters, SubscriptionId, SubscriptionRegistry, SubscriptionStats,
};

/// Shared reference to an EventRelay
pub type SharedEventRelay = Arc<EventRelay>;

/// Read-only monitoring snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStats {
    /// Queue stats keyed by band name
    pub per_band: BTreeMap<String, QueueStats>,
    /// Subscription stats keyed by subscription id
    pub per_subscription: BTreeMap<SubscriptionId, SubscriptionStats>,
    pub dispatch: DispatchStats,
}

impl RelayStats {
    /// Events currently queued across all bands
    pub fn total_pending(&self) -> usize {
        self.per_band.values().map(|stats| stats.size).sum()
    }
}

/// Event routing core
pub struct EventRelay {
    config: RelayConfig,
    router: Arc<MultiBandRouter>,
    registry: Arc<SubscriptionRegistry>,
    dead_letters: SharedDeadLetterSink,
    counters: Arc<DispatchCounters>,
}

impl EventRelay {
    /// Build a relay from a validated configuration
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        config.validate()?;
        Ok(Self {
            router: Arc::new(MultiBandRouter::new(config.bands)),
            registry: Arc::new(SubscriptionRegistry::new()),
            dead_letters: Arc::new(LogDeadLetterSink),
            counters: Arc::new(DispatchCounters::default()),
            config,
        })
    }

    /// Replace the default logging dead-letter sink
    pub fn with_dead_letter_sink(mut self, sink: SharedDeadLetterSink) -> Self {
        self.dead_letters = sink;
        self
    }

    /// Create a shared reference to this relay
    pub fn shared(self) -> SharedEventRelay {
        Arc::new(self)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<MultiBandRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Hand an event to the router. `false` means admission control
    /// rejected it; the producer decides whether to retry or drop.
    pub fn publish(&self, event: Event) -> bool {
        debug!(
            event_id = %event.id(),
            topic = %event.topic,
            priority = %event.priority,
            "Publishing event"
        );
        self.router.route(event)
    }

    /// Register interest in `patterns`, narrowed by `filters`.
    ///
    /// The subscription's circuit breaker uses the configured failure
    /// threshold.
    pub fn subscribe<I, S>(
        &self,
        subscriber_id: impl Into<String>,
        patterns: I,
        filters: SubscriptionFilters,
        deliver: SharedDeliver,
    ) -> RelayResult<SubscriptionId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let subscription = Subscription::new(subscriber_id, patterns, deliver)?
            .with_filters(filters)
            .with_failure_threshold(self.config.failure_threshold);
        Ok(self.registry.subscribe(subscription))
    }

    /// Register a fully built subscription
    pub fn register(&self, subscription: Subscription) -> SubscriptionId {
        self.registry.subscribe(subscription)
    }

    /// Deactivate one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.registry.unsubscribe(subscription_id)
    }

    /// Drop one pattern from a subscriber's subscriptions
    pub fn unsubscribe_pattern(&self, subscriber_id: &str, pattern: &str) -> usize {
        self.registry.unsubscribe_pattern(subscriber_id, pattern)
    }

    /// Manually close a subscription's circuit
    pub fn reset_circuit(&self, subscription_id: &str) -> RelayResult<()> {
        self.registry.reset_circuit(subscription_id)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            per_band: self.router.stats(),
            per_subscription: self.registry.stats(),
            dispatch: self.counters.snapshot(),
        }
    }

    /// A dispatcher wired to this relay, sharing its counters
    pub fn dispatcher(&self, name: impl Into<String>) -> Dispatcher {
        Dispatcher::new(
            name,
            self.router.clone(),
            self.registry.clone(),
            self.dead_letters.clone(),
            DispatchConfig::from(&self.config),
        )
        .with_counters(self.counters.clone())
    }

    /// Spawn `config.dispatchers` dispatcher tasks
    pub fn start(&self) -> RelayHandle {
        let shutdown = CancellationToken::new();
        let retries = TaskTracker::new();
        let tasks = (0..self.config.dispatchers)
            .map(|i| {
                let dispatcher = self
                    .dispatcher(format!("dispatcher-{i}"))
                    .with_retries(retries.clone(), shutdown.clone());
                tokio::spawn(dispatcher.run(shutdown.clone()))
            })
            .collect::<Vec<_>>();

        info!(dispatchers = tasks.len(), "Relay started");
        RelayHandle {
            shutdown,
            tasks,
            retries,
        }
    }
}

/// Running dispatcher pool
pub struct RelayHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<Dispatcher>>,
    retries: TaskTracker,
}

impl RelayHandle {
    pub fn dispatchers(&self) -> usize {
        self.tasks.len()
    }

    /// Token that stops every dispatcher when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel all dispatchers and wait for them. Delayed retries still
    /// sleeping are routed immediately and awaited, so their events stay
    /// queued in the router. Returns each dispatcher's final state.
    pub async fn shutdown(self) -> Vec<DispatchState> {
        self.shutdown.cancel();

        let mut states = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(dispatcher) => states.push(dispatcher.state()),
                Err(e) => warn!(error = %e, "Dispatcher task failed"),
            }
        }

        self.retries.close();
        if !self.retries.is_empty() {
            debug!(pending = self.retries.len(), "Flushing delayed retries");
        }
        self.retries.wait().await;
        info!(stopped = states.len(), "Relay stopped");
        states
    }
}
