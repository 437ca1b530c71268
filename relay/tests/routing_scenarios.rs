//! End-to-end routing scenarios driven through the public relay API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use swarm_relay::dispatch::DeliveryResult;
use swarm_relay::{
    CircuitState, DeadLetterQueue, Deliver, DeliveryStatus, DispatchOutcome, Event, EventPriority,
    EventRelay, EventType, RelayConfig, SharedDeliver, SubscriptionFilters,
};

/// Delivery callback that records every event it sees.
struct Recorder {
    seen: Mutex<Vec<Event>>,
    fail: bool,
}

impl Recorder {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn topics(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.topic.clone())
            .collect()
    }

    fn ids(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.id().to_string())
            .collect()
    }
}

#[async_trait]
impl Deliver for Recorder {
    async fn deliver(&self, event: &Event) -> DeliveryResult {
        self.seen.lock().unwrap().push(event.clone());
        if self.fail {
            DeliveryResult::failed("consumer unavailable")
        } else {
            DeliveryResult::ok()
        }
    }
}

fn shared(recorder: &Arc<Recorder>) -> SharedDeliver {
    recorder.clone()
}

fn event(topic: &str, priority: EventPriority) -> Event {
    Event::new(topic, EventType::TaskCreated, "scheduler").with_priority(priority)
}

/// Run one dispatcher until the router stays empty.
async fn drain(relay: &EventRelay) -> Vec<DispatchOutcome> {
    let mut dispatcher = relay.dispatcher("drain");
    let mut outcomes = Vec::new();
    while let Some(outcome) = dispatcher.dispatch_once(Duration::ZERO).await {
        outcomes.push(outcome);
    }
    outcomes
}

#[tokio::test]
async fn test_delivery_follows_priority_order() {
    let relay = EventRelay::new(RelayConfig::default()).unwrap();
    let recorder = Recorder::accepting();
    relay
        .subscribe("planner", ["task.*"], SubscriptionFilters::new(), shared(&recorder))
        .unwrap();

    let e1 = event("task.a", EventPriority::Low);
    let e2 = event("task.b", EventPriority::Critical);
    let e3 = event("task.a", EventPriority::Normal);
    let expected = vec![e2.id().to_string(), e3.id().to_string(), e1.id().to_string()];

    assert!(relay.publish(e1));
    assert!(relay.publish(e2));
    assert!(relay.publish(e3));
    drain(&relay).await;

    assert_eq!(recorder.ids(), expected);
}

#[tokio::test]
async fn test_retry_then_dead_letter() {
    let dead_letters = DeadLetterQueue::new(10).shared();
    let relay = EventRelay::new(RelayConfig {
        max_retries: 2,
        failure_threshold: 10,
        ..Default::default()
    })
    .unwrap()
    .with_dead_letter_sink(dead_letters.clone());

    let flaky = Recorder::failing();
    relay
        .subscribe("flaky", ["task.*"], SubscriptionFilters::new(), shared(&flaky))
        .unwrap();

    assert!(relay.publish(event("task.a", EventPriority::Normal)));
    let outcomes = drain(&relay).await;

    assert_eq!(flaky.count(), 3);
    assert_eq!(outcomes.len(), 3);

    let dead = dead_letters.drain();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].delivery_status(), DeliveryStatus::DeadLetter);
    assert_eq!(dead[0].delivery_attempts(), 3);

    let stats = relay.stats();
    assert_eq!(stats.dispatch.retried, 2);
    assert_eq!(stats.dispatch.dead_lettered, 1);
    assert_eq!(stats.dispatch.processed, 3);
    assert_eq!(stats.total_pending(), 0);
}

#[tokio::test]
async fn test_open_circuit_isolates_failing_subscriber() {
    let relay = EventRelay::new(RelayConfig {
        failure_threshold: 3,
        ..Default::default()
    })
    .unwrap();

    let healthy = Recorder::accepting();
    let broken = Recorder::failing();
    relay
        .subscribe("healthy", ["*"], SubscriptionFilters::new(), shared(&healthy))
        .unwrap();
    let broken_id = relay
        .subscribe("broken", ["*"], SubscriptionFilters::new(), shared(&broken))
        .unwrap();

    for i in 0..5 {
        assert!(relay.publish(event(&format!("task.t{i}"), EventPriority::Normal)));
    }
    let outcomes = drain(&relay).await;

    assert_eq!(healthy.count(), 5);
    assert_eq!(broken.count(), 3);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, DispatchOutcome::Delivered { .. })));

    let stats = relay.stats();
    let broken_stats = &stats.per_subscription[&broken_id];
    assert_eq!(broken_stats.circuit_state, CircuitState::Open);
    assert!(broken_stats.opened_at.is_some());
    assert_eq!(stats.dispatch.dead_lettered, 0);

    relay.reset_circuit(&broken_id).unwrap();
    assert!(relay.publish(event("task.again", EventPriority::Normal)));
    drain(&relay).await;
    assert_eq!(broken.count(), 4);
}

#[tokio::test]
async fn test_dispatcher_pool_delivers_each_event_once() {
    let relay = EventRelay::new(RelayConfig {
        dispatchers: 4,
        fetch_timeout_ms: 20,
        ..Default::default()
    })
    .unwrap();

    let recorder = Recorder::accepting();
    relay
        .subscribe("sink", ["task.*"], SubscriptionFilters::new(), shared(&recorder))
        .unwrap();

    let handle = relay.start();
    let priorities = EventPriority::all();
    for i in 0..200 {
        let priority = priorities[i % priorities.len()];
        assert!(relay.publish(event(&format!("task.n{i}"), priority)));
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while recorder.count() < 200 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    let ids = recorder.ids();
    assert_eq!(ids.len(), 200);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 200);
    assert_eq!(relay.stats().dispatch.delivered, 200);
}

#[tokio::test]
async fn test_admission_control_per_band() {
    let relay = EventRelay::new(RelayConfig {
        bands: swarm_relay::BandCapacities::uniform(2),
        ..Default::default()
    })
    .unwrap();

    assert!(relay.publish(event("task.l1", EventPriority::Low)));
    assert!(relay.publish(event("task.l2", EventPriority::Low)));
    assert!(!relay.publish(event("task.l3", EventPriority::Low)));

    // A full low band does not affect other bands.
    assert!(relay.publish(event("task.h1", EventPriority::High)));

    let stats = relay.stats();
    assert_eq!(stats.per_band["low"].total_dropped, 1);
    assert_eq!(stats.per_band["low"].size, 2);
    assert_eq!(stats.per_band["high"].size, 1);
}

#[tokio::test]
async fn test_unsubscribe_pattern_keeps_other_interest() {
    let relay = EventRelay::new(RelayConfig::default()).unwrap();
    let recorder = Recorder::accepting();
    relay
        .subscribe(
            "monitor",
            ["task.*", "agent.*"],
            SubscriptionFilters::new(),
            shared(&recorder),
        )
        .unwrap();

    assert_eq!(relay.unsubscribe_pattern("monitor", "task.*"), 1);
    relay.publish(event("task.created", EventPriority::Normal));
    relay.publish(event("agent.started", EventPriority::Normal));
    let outcomes = drain(&relay).await;

    assert_eq!(recorder.topics(), vec!["agent.started".to_string()]);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(relay.stats().dispatch.vacuous, 1);
}

#[tokio::test]
async fn test_filters_narrow_delivery() {
    let relay = EventRelay::new(RelayConfig::default()).unwrap();
    let urgent = Recorder::accepting();
    relay
        .subscribe(
            "pager",
            ["*"],
            SubscriptionFilters::new()
                .min_priority(EventPriority::High)
                .types([EventType::TaskFailed]),
            shared(&urgent),
        )
        .unwrap();

    relay.publish(
        Event::new("task.failed", EventType::TaskFailed, "worker-3")
            .with_priority(EventPriority::Critical),
    );
    relay.publish(
        Event::new("task.failed", EventType::TaskFailed, "worker-3")
            .with_priority(EventPriority::Low),
    );
    relay.publish(event("task.created", EventPriority::System));
    drain(&relay).await;

    assert_eq!(urgent.count(), 1);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let relay = EventRelay::new(RelayConfig::default()).unwrap();
    let recorder = Recorder::accepting();
    let id = relay
        .subscribe("temp", ["task.*"], SubscriptionFilters::new(), shared(&recorder))
        .unwrap();

    relay.publish(event("task.one", EventPriority::Normal));
    drain(&relay).await;
    assert!(relay.unsubscribe(&id));
    relay.publish(event("task.two", EventPriority::Normal));
    drain(&relay).await;

    assert_eq!(recorder.topics(), vec!["task.one".to_string()]);
    assert!(!relay.stats().per_subscription[&id].active);
}
