//! Bounded priority queues and the multi-band router built on them.

pub mod bands;
pub mod bounded;

pub use bands::{Band, BandCapacities, MultiBandRouter};
pub use bounded::{BoundedPriorityQueue, QueueStats};
