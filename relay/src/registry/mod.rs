//! Subscription Registry — subscriber interest and delivery health
//!
//! Holds every subscription, answers "who wants this event" for the
//! dispatcher, and owns each subscription's circuit breaker. The registry
//! has its own lock, so subscribe/unsubscribe traffic never contends with
//! queue traffic.
//!
//! Match results are snapshots: a subscription deactivated or purged while
//! a dispatch is in flight still completes that delivery.

pub mod circuit_breaker;
pub mod pattern;
pub mod subscription;

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::error::{RelayError, RelayResult};
use crate::events::Event;

pub use circuit_breaker::{CircuitBreaker, CircuitState, DEFAULT_FAILURE_THRESHOLD};
pub use pattern::TopicPattern;
pub use subscription::{Subscription, SubscriptionFilters, SubscriptionId, SubscriptionStats};

#[derive(Default)]
struct RegistryInner {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    // Registration order, used as the tie-break when ordering matches.
    order: Vec<SubscriptionId>,
}

/// Registry of subscriptions and their circuit breakers
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            warn!("Subscription registry lock poisoned, recovering state");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            warn!("Subscription registry lock poisoned, recovering state");
            poisoned.into_inner()
        })
    }

    /// Store a subscription and return its id
    pub fn subscribe(&self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.id().to_string();
        info!(
            subscription_id = %id,
            subscriber_id = %subscription.subscriber_id,
            topics = subscription.topics().len(),
            priority = %subscription.priority,
            "Subscription registered"
        );

        let mut inner = self.write();
        if inner.subscriptions.insert(id.clone(), subscription).is_none() {
            inner.order.push(id.clone());
        }
        id
    }

    /// Deactivate one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut inner = self.write();
        match inner.subscriptions.get_mut(subscription_id) {
            Some(subscription) => {
                subscription.deactivate();
                info!(subscription_id, "Subscription deactivated");
                true
            }
            None => false,
        }
    }

    /// Remove `pattern` from every subscription owned by `subscriber_id`.
    ///
    /// Other patterns keep matching; a subscription left with no patterns
    /// is deactivated. Returns the number of subscriptions changed.
    pub fn unsubscribe_pattern(&self, subscriber_id: &str, pattern: &str) -> usize {
        let mut inner = self.write();
        let changed = inner
            .subscriptions
            .values_mut()
            .filter(|s| s.subscriber_id == subscriber_id)
            .map(|s| s.remove_pattern(pattern))
            .filter(|removed| *removed)
            .count();
        info!(subscriber_id, pattern, changed, "Pattern unsubscribed");
        changed
    }

    /// Active, healthy subscriptions interested in `event`.
    ///
    /// Ordered by subscription priority class (highest first), then by
    /// registration order.
    pub fn match_event(&self, event: &Event) -> Vec<Subscription> {
        let inner = self.read();
        let mut matched: Vec<Subscription> = inner
            .order
            .iter()
            .filter_map(|id| inner.subscriptions.get(id))
            .filter(|s| s.matches(event))
            .cloned()
            .collect();
        // Stable sort keeps registration order within a class.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        debug!(
            event_id = %event.id(),
            topic = %event.topic,
            matched = matched.len(),
            "Subscriptions matched"
        );
        matched
    }

    /// Reset the failure streak and close the circuit
    pub fn record_success(&self, subscription_id: &str) -> RelayResult<()> {
        let mut inner = self.write();
        let subscription = inner
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| RelayError::UnknownSubscription(subscription_id.to_string()))?;

        let was_open = subscription.health().is_open();
        subscription.health_mut().record_success();
        if was_open {
            info!(subscription_id, "Circuit closed after successful delivery");
        }
        Ok(())
    }

    /// Count a failure; returns the resulting circuit state
    pub fn record_failure(&self, subscription_id: &str) -> RelayResult<CircuitState> {
        let mut inner = self.write();
        let subscription = inner
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| RelayError::UnknownSubscription(subscription_id.to_string()))?;

        if subscription.health_mut().record_failure() {
            warn!(
                subscription_id,
                subscriber_id = %subscription.subscriber_id,
                failures = subscription.health().consecutive_failures(),
                "Circuit opened, subscription isolated"
            );
        }
        Ok(subscription.health().state())
    }

    /// Explicitly close a subscription's circuit
    pub fn reset_circuit(&self, subscription_id: &str) -> RelayResult<()> {
        let mut inner = self.write();
        let subscription = inner
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| RelayError::UnknownSubscription(subscription_id.to_string()))?;
        subscription.health_mut().reset();
        info!(subscription_id, "Circuit reset");
        Ok(())
    }

    /// Physically drop deactivated subscriptions. Returns how many were dropped.
    pub fn purge_inactive(&self) -> usize {
        let mut inner = self.write();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|_, s| s.is_active());
        let RegistryInner {
            subscriptions,
            order,
        } = &mut *inner;
        order.retain(|id| subscriptions.contains_key(id));
        before - subscriptions.len()
    }

    pub fn get(&self, subscription_id: &str) -> Option<Subscription> {
        self.read().subscriptions.get(subscription_id).cloned()
    }

    /// Every subscription owned by `subscriber_id`, in registration order
    pub fn subscriptions_for(&self, subscriber_id: &str) -> Vec<Subscription> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.subscriptions.get(id))
            .filter(|s| s.subscriber_id == subscriber_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.read()
            .subscriptions
            .values()
            .filter(|s| s.is_active())
            .count()
    }

    /// Stats keyed by subscription id
    pub fn stats(&self) -> BTreeMap<SubscriptionId, SubscriptionStats> {
        self.read()
            .subscriptions
            .iter()
            .map(|(id, s)| (id.clone(), s.stats()))
            .collect()
    }
}
