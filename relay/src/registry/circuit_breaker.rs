//! Per-subscription circuit breaker.
//!
//! The breaker counts consecutive delivery failures. Once the count reaches
//! the threshold the circuit *opens* and the subscription stops receiving
//! events. It closes again on a recorded success or an explicit reset; the
//! relay never reopens it on a timer, cool-downs belong to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default consecutive failures before the circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Circuit breaker state for a single subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy — deliveries allowed.
    Closed,
    /// Tripped — deliveries blocked until success or reset.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Delivery health for one subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    circuit_open: bool,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    opened_at: Option<DateTime<Utc>>,
    total_successes: u64,
    total_failures: u64,
    last_delivery_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            circuit_open: false,
            failure_threshold,
            opened_at: None,
            total_successes: 0,
            total_failures: 0,
            last_delivery_at: None,
        }
    }

    /// Record a success — resets circuit to Closed.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.circuit_open = false;
        self.opened_at = None;
        self.total_successes += 1;
        self.last_delivery_at = Some(Utc::now());
    }

    /// Record a failure — may trip circuit to Open.
    ///
    /// Returns `true` when this failure tripped the circuit.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_delivery_at = Some(Utc::now());

        if !self.circuit_open && self.consecutive_failures >= self.failure_threshold {
            self.circuit_open = true;
            self.opened_at = Some(Utc::now());
            return true;
        }
        false
    }

    /// Close the circuit without recording a delivery.
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.circuit_open = false;
        self.opened_at = None;
    }

    /// Current state of the circuit.
    pub fn state(&self) -> CircuitState {
        if self.circuit_open {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.circuit_open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn total_successes(&self) -> u64 {
        self.total_successes
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn last_delivery_at(&self) -> Option<DateTime<Utc>> {
        self.last_delivery_at
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_threshold, 5);
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(2);
        assert!(!cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.record_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.opened_at().is_some());
        // Already open: further failures do not re-trip.
        assert!(!cb.record_failure());
        assert_eq!(cb.consecutive_failures(), 3);
    }

    #[test]
    fn test_success_resets_circuit() {
        let mut cb = CircuitBreaker::new(2);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_open());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.total_failures(), 2);
        assert_eq!(cb.total_successes(), 1);
    }

    #[test]
    fn test_reset_keeps_totals() {
        let mut cb = CircuitBreaker::new(1);
        cb.record_failure();
        cb.reset();
        assert!(!cb.is_open());
        assert!(cb.opened_at().is_none());
        assert_eq!(cb.total_failures(), 1);
    }

    #[test]
    fn test_success_interrupts_failure_streak() {
        let mut cb = CircuitBreaker::new(3);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
