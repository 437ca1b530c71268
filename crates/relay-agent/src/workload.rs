//! Synthetic swarm workload
//!
//! Producers publish a rotating mix of agent, task, workflow, system and
//! alert events across every priority. Consumers:
//! - `auditor`: everything except alerts
//! - `task-tracker`: `task.*` at NORMAL or above
//! - `workflow-watcher`: `workflow.*`
//! - `flaky` (optional): `alert.*`, refuses every delivery, so its circuit
//!   opens and exhausted alerts land in the dead-letter queue

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use swarm_relay::{
    deliver_fn, DeadLetterQueue, DeliveryResult, Event, EventPriority, EventRelay, EventType,
    RelayConfig, RelayStats, SharedDeliver, SubscriptionFilters,
};
use tracing::{info, warn};

const TOPICS: &[(&str, EventType)] = &[
    ("task.created", EventType::TaskCreated),
    ("agent.started", EventType::AgentStarted),
    ("task.completed", EventType::TaskCompleted),
    ("workflow.started", EventType::WorkflowStarted),
    ("system.heartbeat", EventType::System),
    ("alert.raised", EventType::Custom),
];

/// Shape of a workload run
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub events: usize,
    pub producers: usize,
    /// Register the always-failing `flaky` consumer
    pub flaky_consumer: bool,
    /// Upper bound on waiting for the relay to settle
    pub drain_timeout: Duration,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            events: 1_000,
            producers: 4,
            flaky_consumer: true,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a workload run
#[derive(Debug, Serialize)]
pub struct WorkloadReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub published: usize,
    /// Publishes refused by admission control
    pub rejected: usize,
    /// Delivery callback invocations per consumer
    pub received: BTreeMap<String, usize>,
    pub dead_letters: usize,
    /// Whether the relay settled before the drain timeout
    pub drained: bool,
    pub stats: RelayStats,
}

fn counting(counter: Arc<AtomicUsize>, fail: bool) -> SharedDeliver {
    deliver_fn(move |_event: Event| {
        counter.fetch_add(1, Ordering::Relaxed);
        async move {
            if fail {
                DeliveryResult::failed("flaky consumer refused event")
            } else {
                DeliveryResult::ok()
            }
        }
    })
}

/// Deterministic event for sequence number `seq`
fn synthetic_event(seq: usize, producer: usize) -> Event {
    let (topic, event_type) = TOPICS[seq % TOPICS.len()];
    let priorities = EventPriority::all();
    let priority = priorities[(seq / TOPICS.len()) % priorities.len()];

    Event::new(topic, event_type, format!("producer-{producer}"))
        .with_priority(priority)
        .with_payload("seq", seq as i64)
        .with_correlation_id(format!("batch-{}", seq / 10))
}

/// Every fetched event has reached a final or retry outcome and nothing is queued
fn is_settled(stats: &RelayStats) -> bool {
    let d = &stats.dispatch;
    stats.total_pending() == 0
        && d.processed == d.delivered + d.vacuous + d.expired + d.retried + d.dead_lettered
}

async fn wait_until_settled(relay: &EventRelay, timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    // Long enough for a delayed retry to land back in the router.
    let settle = relay.config().retry_delay().unwrap_or_default() + Duration::from_millis(20);

    while deadline.map_or(true, |deadline| Instant::now() < deadline) {
        if is_settled(&relay.stats()) {
            tokio::time::sleep(settle).await;
            if is_settled(&relay.stats()) {
                return true;
            }
        } else {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
    false
}

/// Run the workload against a fresh relay built from `config`
pub async fn run_workload(
    config: RelayConfig,
    workload: &WorkloadSpec,
) -> Result<WorkloadReport> {
    let started_at = Utc::now();
    let clock = Instant::now();

    let dead_letters = DeadLetterQueue::new(config.dead_letter_capacity).shared();
    let relay = EventRelay::new(config)
        .context("Failed to build relay")?
        .with_dead_letter_sink(dead_letters.clone())
        .shared();

    let mut consumers: Vec<(&str, Vec<&str>, SubscriptionFilters, bool)> = vec![
        (
            "auditor",
            vec!["task.*", "agent.*", "workflow.*", "system.*"],
            SubscriptionFilters::new(),
            false,
        ),
        (
            "task-tracker",
            vec!["task.*"],
            SubscriptionFilters::new().min_priority(EventPriority::Normal),
            false,
        ),
        (
            "workflow-watcher",
            vec!["workflow.*"],
            SubscriptionFilters::new(),
            false,
        ),
    ];
    if workload.flaky_consumer {
        consumers.push(("flaky", vec!["alert.*"], SubscriptionFilters::new(), true));
    }

    let mut counters = BTreeMap::new();
    for (name, patterns, filters, fail) in consumers {
        let counter = Arc::new(AtomicUsize::new(0));
        relay
            .subscribe(name, patterns, filters, counting(counter.clone(), fail))
            .with_context(|| format!("Failed to subscribe {name}"))?;
        counters.insert(name.to_string(), counter);
    }

    let handle = relay.start();
    info!(
        events = workload.events,
        producers = workload.producers,
        dispatchers = handle.dispatchers(),
        "Workload started"
    );

    let producers = workload.producers.max(1);
    let per_producer = workload.events.div_ceil(producers);
    let mut tasks = Vec::with_capacity(producers);
    for producer in 0..producers {
        let relay = relay.clone();
        let start = (producer * per_producer).min(workload.events);
        let end = ((producer + 1) * per_producer).min(workload.events);
        tasks.push(tokio::spawn(async move {
            let mut rejected = 0usize;
            for seq in start..end {
                if !relay.publish(synthetic_event(seq, producer)) {
                    rejected += 1;
                }
                tokio::task::yield_now().await;
            }
            rejected
        }));
    }

    let mut rejected = 0;
    for task in tasks {
        rejected += task.await.context("Producer task failed")?;
    }

    let drained = wait_until_settled(&relay, workload.drain_timeout).await;
    if !drained {
        warn!(
            timeout_ms = workload.drain_timeout.as_millis() as u64,
            "Relay did not settle before drain timeout"
        );
    }
    handle.shutdown().await;

    let report = WorkloadReport {
        started_at,
        elapsed_ms: clock.elapsed().as_millis() as u64,
        published: workload.events,
        rejected,
        received: counters
            .into_iter()
            .map(|(name, counter)| (name, counter.load(Ordering::Relaxed)))
            .collect(),
        dead_letters: dead_letters.len(),
        drained,
        stats: relay.stats(),
    };
    info!(
        published = report.published,
        rejected = report.rejected,
        dead_letters = report.dead_letters,
        elapsed_ms = report.elapsed_ms,
        "Workload finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_relay::CircuitState;

    fn config(dispatchers: usize) -> RelayConfig {
        RelayConfig {
            dispatchers,
            fetch_timeout_ms: 20,
            delivery_timeout_ms: 500,
            max_retries: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_synthetic_events_rotate_topics_and_priorities() {
        let first = synthetic_event(0, 0);
        assert_eq!(first.topic, "task.created");
        assert_eq!(first.priority, EventPriority::System);

        let next_round = synthetic_event(TOPICS.len(), 1);
        assert_eq!(next_round.topic, "task.created");
        assert_eq!(next_round.priority, EventPriority::Critical);
        assert_eq!(next_round.source, "producer-1");
    }

    #[tokio::test]
    async fn test_healthy_workload_drains() {
        let workload = WorkloadSpec {
            events: 120,
            producers: 3,
            flaky_consumer: false,
            drain_timeout: Duration::from_secs(10),
        };
        let report = run_workload(config(1), &workload).await.unwrap();

        assert!(report.drained);
        assert_eq!(report.rejected, 0);
        // 5 of every 6 topics are audited.
        assert_eq!(report.received["auditor"], 100);
        assert_eq!(report.received["workflow-watcher"], 20);
        assert_eq!(report.dead_letters, 0);
        assert_eq!(report.stats.total_pending(), 0);
        assert_eq!(report.stats.dispatch.vacuous, 20);
    }

    #[tokio::test]
    async fn test_flaky_consumer_is_isolated() {
        let workload = WorkloadSpec {
            events: 120,
            producers: 2,
            flaky_consumer: true,
            drain_timeout: Duration::from_secs(10),
        };
        let report = run_workload(config(2), &workload).await.unwrap();

        assert!(report.drained);
        assert_eq!(report.received["auditor"], 100);
        assert!(report.received["flaky"] >= 5);

        let flaky = report
            .stats
            .per_subscription
            .values()
            .find(|s| s.subscriber_id == "flaky")
            .unwrap();
        assert_eq!(flaky.circuit_state, CircuitState::Open);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["stats"]["dispatch"]["processed"].as_u64().unwrap() >= 120);
    }
}
