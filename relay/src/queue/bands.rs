//! Multi-band router
//!
//! Splits traffic into four independent bounded queues by priority and
//! drains them in strict band order. A sustained stream of `system` or
//! `high` events starves the lower bands; there is no aging or weighting.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::bounded::{BoundedPriorityQueue, QueueStats};
use crate::events::{Event, EventPriority};

/// Priority band, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    System,
    High,
    Normal,
    Low,
}

impl Band {
    /// All bands in drain order
    pub fn all() -> &'static [Band] {
        &[Band::System, Band::High, Band::Normal, Band::Low]
    }

    /// Band an event of `priority` is routed to
    pub fn for_priority(priority: EventPriority) -> Band {
        match priority {
            EventPriority::System => Band::System,
            p if p >= EventPriority::High => Band::High,
            p if p >= EventPriority::Normal => Band::Normal,
            _ => Band::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::System => "system",
            Band::High => "high",
            Band::Normal => "normal",
            Band::Low => "low",
        }
    }

    fn index(self) -> usize {
        match self {
            Band::System => 0,
            Band::High => 1,
            Band::Normal => 2,
            Band::Low => 3,
        }
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-band queue capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandCapacities {
    pub system: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl BandCapacities {
    pub fn get(&self, band: Band) -> usize {
        match band {
            Band::System => self.system,
            Band::High => self.high,
            Band::Normal => self.normal,
            Band::Low => self.low,
        }
    }

    /// Same capacity for every band
    pub fn uniform(capacity: usize) -> Self {
        Self {
            system: capacity,
            high: capacity,
            normal: capacity,
            low: capacity,
        }
    }
}

impl Default for BandCapacities {
    /// Default: system 1000, high 5000, normal 10000, low 5000.
    fn default() -> Self {
        Self {
            system: 1_000,
            high: 5_000,
            normal: 10_000,
            low: 5_000,
        }
    }
}

/// Routes events into priority bands and hands out the next event across
/// all of them.
pub struct MultiBandRouter {
    bands: [BoundedPriorityQueue; 4],
    // Signalled on every accepted route so a waiting `next` rescans all bands.
    routed: Notify,
}

impl MultiBandRouter {
    pub fn new(capacities: BandCapacities) -> Self {
        let queue = |band: Band| BoundedPriorityQueue::new(band.as_str(), capacities.get(band));
        Self {
            bands: [
                queue(Band::System),
                queue(Band::High),
                queue(Band::Normal),
                queue(Band::Low),
            ],
            routed: Notify::new(),
        }
    }

    /// Queue backing `band`
    pub fn band(&self, band: Band) -> &BoundedPriorityQueue {
        &self.bands[band.index()]
    }

    /// Route an event to its band. Full bands apply priority-aware eviction.
    pub fn route(&self, event: Event) -> bool {
        self.try_route(event).is_ok()
    }

    /// Like [`route`](Self::route), but hands a rejected event back
    pub fn try_route(&self, event: Event) -> Result<(), Event> {
        let band = Band::for_priority(event.priority);
        let event_id = event.id().to_string();
        let result = self.band(band).offer(event, true);
        let accepted = result.is_ok();
        if accepted {
            self.routed.notify_one();
        }
        debug!(band = %band, event_id = %event_id, accepted, "Event routed");
        result
    }

    /// Take the next event from the highest non-empty band without waiting
    pub fn try_next(&self) -> Option<Event> {
        Band::all()
            .iter()
            .find_map(|band| self.band(*band).try_dequeue())
    }

    /// Take the next event in strict band order, waiting up to `timeout`
    /// for one to be routed. `Duration::MAX` waits until an event arrives
    /// or the future is dropped.
    pub async fn next(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if let Some(event) = self.try_next() {
                return Some(event);
            }
            let Some(deadline) = deadline else {
                self.routed.notified().await;
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if tokio::time::timeout(deadline - now, self.routed.notified())
                .await
                .is_err()
            {
                return self.try_next();
            }
        }
    }

    /// Remove a queued event from whichever band holds it
    pub fn remove_by_id(&self, id: &str) -> bool {
        self.bands.iter().any(|queue| queue.remove_by_id(id))
    }

    /// Events currently queued across all bands
    pub fn total_pending(&self) -> usize {
        self.bands.iter().map(BoundedPriorityQueue::len).sum()
    }

    pub fn len_by_band(&self) -> BTreeMap<Band, usize> {
        Band::all()
            .iter()
            .map(|band| (*band, self.band(*band).len()))
            .collect()
    }

    /// Stats keyed by band name
    pub fn stats(&self) -> BTreeMap<String, QueueStats> {
        Band::all()
            .iter()
            .map(|band| (band.as_str().to_string(), self.band(*band).stats()))
            .collect()
    }
}

impl Default for MultiBandRouter {
    fn default() -> Self {
        Self::new(BandCapacities::default())
    }
}
