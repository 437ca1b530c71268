//! Dispatcher State Machine — explicit states and legal transition guards.
//!
//! The dispatch loop cycles `Idle → Fetching → Matching → Delivering →
//! Recording → Idle` and may stop from any state. Each dispatcher owns one
//! [`DispatchStateMachine`]; every transition is validated and the most
//! recent ones are kept for diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Transitions retained in the log
const TRANSITION_LOG_CAPACITY: usize = 64;

/// The set of dispatcher states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Between cycles.
    Idle,
    /// Waiting on the router for the next event.
    Fetching,
    /// Looking up interested subscriptions.
    Matching,
    /// Invoking delivery callbacks.
    Delivering,
    /// Updating circuit breakers and the event's delivery status.
    Recording,
    /// Shut down — terminal state.
    Stopped,
}

impl DispatchState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Fetching => write!(f, "Fetching"),
            Self::Matching => write!(f, "Matching"),
            Self::Delivering => write!(f, "Delivering"),
            Self::Recording => write!(f, "Recording"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Legal transitions between dispatcher states.
///
/// ```text
/// Idle → Fetching
/// Fetching → Matching | Idle (timeout)
/// Matching → Delivering | Idle (no subscribers, expired)
/// Delivering → Recording
/// Recording → Idle
/// any non-terminal → Stopped
/// ```
fn is_legal_transition(from: DispatchState, to: DispatchState) -> bool {
    use DispatchState::*;

    if to == Stopped && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Fetching)
            | (Fetching, Matching)
            | (Fetching, Idle)
            | (Matching, Delivering)
            | (Matching, Idle)
            | (Delivering, Recording)
            | (Recording, Idle)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: DispatchState,
    pub to: DispatchState,
    /// Dispatch cycle number at the time of transition.
    pub cycle: u64,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Illegal dispatch transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: DispatchState,
    pub to: DispatchState,
}

/// The dispatcher state machine.
pub struct DispatchStateMachine {
    current: DispatchState,
    cycle: u64,
    created_at: Instant,
    transitions: VecDeque<TransitionRecord>,
}

impl DispatchStateMachine {
    /// Create a new state machine starting at `Idle`.
    pub fn new() -> Self {
        Self {
            current: DispatchState::Idle,
            cycle: 0,
            created_at: Instant::now(),
            transitions: VecDeque::with_capacity(TRANSITION_LOG_CAPACITY),
        }
    }

    pub fn current(&self) -> DispatchState {
        self.current
    }

    /// Completed fetch cycles (incremented on every `Idle → Fetching`).
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: DispatchState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        if self.current == DispatchState::Idle && to == DispatchState::Fetching {
            self.cycle += 1;
        }

        tracing::trace!(
            from = %self.current,
            to = %to,
            cycle = self.cycle,
            "Dispatch state transition"
        );

        if self.transitions.len() == TRANSITION_LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            from: self.current,
            to,
            cycle: self.cycle,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Transition to `Stopped` from any non-terminal state.
    pub fn stop(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(DispatchState::Stopped, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Most recent transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }
}

impl Default for DispatchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DispatchState::*;

    #[test]
    fn test_initial_state() {
        let sm = DispatchStateMachine::new();
        assert_eq!(sm.current(), Idle);
        assert!(!sm.is_terminal());
        assert_eq!(sm.transitions().count(), 0);
    }

    #[test]
    fn test_full_cycle() {
        let mut sm = DispatchStateMachine::new();
        for state in [Fetching, Matching, Delivering, Recording, Idle] {
            sm.advance(state, None).unwrap();
        }
        assert_eq!(sm.current(), Idle);
        assert_eq!(sm.cycle(), 1);
        assert_eq!(sm.transitions().count(), 5);
    }

    #[test]
    fn test_timeout_and_vacuous_paths() {
        let mut sm = DispatchStateMachine::new();
        sm.advance(Fetching, None).unwrap();
        sm.advance(Idle, Some("timeout")).unwrap();
        sm.advance(Fetching, None).unwrap();
        sm.advance(Matching, None).unwrap();
        sm.advance(Idle, Some("no subscribers")).unwrap();
        assert_eq!(sm.cycle(), 2);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut sm = DispatchStateMachine::new();
        let err = sm.advance(Delivering, None).unwrap_err();
        assert_eq!(err.from, Idle);
        assert_eq!(err.to, Delivering);
        assert_eq!(err.to_string(), "Illegal dispatch transition: Idle → Delivering");

        sm.advance(Fetching, None).unwrap();
        assert!(sm.advance(Recording, None).is_err());
    }

    #[test]
    fn test_stop_from_any_state_is_terminal() {
        let mut sm = DispatchStateMachine::new();
        sm.advance(Fetching, None).unwrap();
        sm.advance(Matching, None).unwrap();
        sm.stop("shutdown").unwrap();
        assert!(sm.is_terminal());
        assert!(sm.advance(Idle, None).is_err());
        assert!(sm.stop("again").is_err());
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let mut sm = DispatchStateMachine::new();
        for _ in 0..TRANSITION_LOG_CAPACITY {
            sm.advance(Fetching, None).unwrap();
            sm.advance(Idle, None).unwrap();
        }
        assert_eq!(sm.transitions().count(), TRANSITION_LOG_CAPACITY);
        let last = sm.transitions().last().unwrap();
        assert_eq!(last.to, Idle);
        assert_eq!(last.cycle, TRANSITION_LOG_CAPACITY as u64);
    }
}
