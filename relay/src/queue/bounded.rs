//! Bounded priority queue for a single band
//!
//! Events are ordered by priority, then by a per-queue arrival sequence.
//! When full, admission is priority-aware: a more important event may evict
//! the least important queued one, otherwise the newcomer is dropped.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::{Event, EventPriority, OrderingKey};

/// Snapshot of queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub size: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    /// Rejected newcomers plus evicted entries
    pub total_dropped: u64,
    /// Currently queued events per priority
    pub by_priority: BTreeMap<EventPriority, usize>,
}

struct QueuedEvent {
    key: OrderingKey,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

#[derive(Default)]
struct QueueInner {
    // Min-heap on the ordering key: the head is the next event to deliver.
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    next_sequence: u64,
    total_enqueued: u64,
    total_dequeued: u64,
    total_dropped: u64,
    by_priority: BTreeMap<EventPriority, usize>,
}

impl QueueInner {
    fn push(&mut self, event: Event) {
        let key = event.ordering_key(self.next_sequence);
        self.next_sequence += 1;
        *self.by_priority.entry(event.priority).or_insert(0) += 1;
        self.total_enqueued += 1;
        self.heap.push(Reverse(QueuedEvent { key, event }));
    }

    fn pop(&mut self) -> Option<Event> {
        let Reverse(queued) = self.heap.pop()?;
        self.forget(queued.event.priority);
        self.total_dequeued += 1;
        Some(queued.event)
    }

    fn forget(&mut self, priority: EventPriority) {
        if let Some(count) = self.by_priority.get_mut(&priority) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.by_priority.remove(&priority);
            }
        }
    }

    /// Remove the lowest-ranked entry if `candidate` ranks strictly above it.
    fn evict_lowest_below(&mut self, candidate: OrderingKey) -> Option<Event> {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        let lowest = entries
            .iter()
            .enumerate()
            .max_by_key(|(_, Reverse(queued))| queued.key)
            .map(|(idx, _)| idx);

        let evicted = match lowest {
            Some(idx) if candidate < entries[idx].0.key => Some(entries.swap_remove(idx).0),
            _ => None,
        };
        self.heap = BinaryHeap::from(entries);

        let evicted = evicted?;
        self.forget(evicted.event.priority);
        Some(evicted.event)
    }

    fn remove_by_id(&mut self, id: &str) -> Option<Event> {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        let position = entries.iter().position(|Reverse(q)| q.event.id() == id);
        let removed = position.map(|idx| entries.swap_remove(idx).0);
        self.heap = BinaryHeap::from(entries);

        let removed = removed?;
        self.forget(removed.event.priority);
        Some(removed.event)
    }
}

/// Bounded, priority-ordered event queue with async waiting
pub struct BoundedPriorityQueue {
    name: String,
    capacity: usize,
    inner: Mutex<QueueInner>,
    available: Notify,
}

impl BoundedPriorityQueue {
    /// Create a queue holding at most `capacity` events
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            inner: Mutex::new(QueueInner::default()),
            available: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(queue = %self.name, "Queue mutex poisoned, recovering state");
                poisoned.into_inner()
            }
        }
    }

    /// Offer an event to the queue.
    ///
    /// Never suspends. When the queue is full and `block_if_full` is false the
    /// event is rejected; when it is true the event replaces the lowest-ranked
    /// queued entry if it outranks it, and is rejected otherwise.
    pub fn enqueue(&self, event: Event, block_if_full: bool) -> bool {
        self.offer(event, block_if_full).is_ok()
    }

    /// Same admission rules as [`enqueue`](Self::enqueue), but a rejected
    /// event is handed back to the caller.
    pub fn offer(&self, event: Event, block_if_full: bool) -> Result<(), Event> {
        let mut inner = self.lock();

        if inner.heap.len() >= self.capacity {
            if !block_if_full {
                inner.total_dropped += 1;
                debug!(
                    queue = %self.name,
                    event_id = %event.id(),
                    "Queue full, event rejected"
                );
                return Err(event);
            }

            let candidate = event.ordering_key(inner.next_sequence);
            match inner.evict_lowest_below(candidate) {
                Some(evicted) => {
                    inner.total_dropped += 1;
                    warn!(
                        queue = %self.name,
                        evicted_id = %evicted.id(),
                        evicted_priority = %evicted.priority,
                        incoming_id = %event.id(),
                        incoming_priority = %event.priority,
                        "Queue full, evicted lower-priority event"
                    );
                }
                None => {
                    inner.total_dropped += 1;
                    warn!(
                        queue = %self.name,
                        event_id = %event.id(),
                        priority = %event.priority,
                        "Queue full, event ranks too low to admit"
                    );
                    return Err(event);
                }
            }
        }

        debug!(
            queue = %self.name,
            event_id = %event.id(),
            priority = %event.priority,
            "Event enqueued"
        );
        inner.push(event);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Take the head event without waiting
    pub fn try_dequeue(&self) -> Option<Event> {
        self.lock().pop()
    }

    /// Take the head event, waiting up to `timeout` for one to arrive.
    ///
    /// A timeout too large to represent as a deadline (e.g. `Duration::MAX`)
    /// waits until an event arrives or the future is dropped.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(event) = self.try_dequeue() {
                return Some(event);
            }
            let Some(deadline) = deadline else {
                self.available.notified().await;
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if tokio::time::timeout(deadline - now, self.available.notified())
                .await
                .is_err()
            {
                return self.try_dequeue();
            }
        }
    }

    /// Copy of the head event, left in place
    pub fn peek(&self) -> Option<Event> {
        self.lock()
            .heap
            .peek()
            .map(|Reverse(queued)| queued.event.clone())
    }

    /// Wait up to `timeout` for one event, then take up to `max_items - 1`
    /// more without waiting.
    pub async fn drain_batch(&self, max_items: usize, timeout: Duration) -> Vec<Event> {
        if max_items == 0 {
            return Vec::new();
        }
        let Some(first) = self.dequeue(timeout).await else {
            return Vec::new();
        };

        let mut batch = Vec::with_capacity(max_items.min(self.capacity.max(1)));
        batch.push(first);
        let mut inner = self.lock();
        while batch.len() < max_items {
            match inner.pop() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        batch
    }

    /// Remove a specific queued event. Returns whether it was present.
    pub fn remove_by_id(&self, id: &str) -> bool {
        match self.lock().remove_by_id(id) {
            Some(removed) => {
                debug!(queue = %self.name, event_id = %removed.id(), "Event removed from queue");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Drop every queued event, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let cleared = inner.heap.len();
        inner.heap.clear();
        inner.by_priority.clear();
        cleared
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            capacity: self.capacity,
            size: inner.heap.len(),
            total_enqueued: inner.total_enqueued,
            total_dequeued: inner.total_dequeued,
            total_dropped: inner.total_dropped,
            by_priority: inner.by_priority.clone(),
        }
    }
}

impl std::fmt::Debug for BoundedPriorityQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPriorityQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
