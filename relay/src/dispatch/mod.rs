//! Dispatch — moving events from the router to subscribers
//!
//! A [`Dispatcher`] is one worker: it owns a [`DispatchStateMachine`],
//! pulls from the shared [`MultiBandRouter`](crate::queue::MultiBandRouter),
//! and delivers through each subscription's [`Deliver`] callback. Several
//! dispatchers can share one router; each event is handed to exactly one.

pub mod delivery;
pub mod dispatcher;
pub mod state_machine;

pub use delivery::{
    deliver_fn, DeadLetterQueue, DeadLetterSink, Deliver, DeliverFn, DeliveryResult,
    LogDeadLetterSink, SharedDeadLetterSink, SharedDeliver,
};
pub use dispatcher::{DispatchConfig, DispatchCounters, DispatchOutcome, DispatchStats, Dispatcher};
pub use state_machine::{DispatchState, DispatchStateMachine, IllegalTransition, TransitionRecord};
