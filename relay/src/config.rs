//! Relay configuration
//!
//! Layered: defaults, then an optional TOML file, then `RELAY_*`
//! environment variables.
//!
//! ```toml
//! failure_threshold = 5
//! max_retries = 3
//! delivery_timeout_ms = 5000
//! dispatchers = 2
//!
//! [bands]
//! system = 1000
//! high = 5000
//! normal = 10000
//! low = 5000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RelayError, RelayResult};
use crate::queue::BandCapacities;
use crate::registry::DEFAULT_FAILURE_THRESHOLD;

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Capacity of each priority band
    pub bands: BandCapacities,
    /// Consecutive failures before a subscription's circuit opens
    pub failure_threshold: u32,
    /// Re-routes allowed after the first failed delivery attempt
    pub max_retries: u32,
    /// Per-subscription delivery timeout
    pub delivery_timeout_ms: u64,
    /// How long one fetch waits for an event before cycling
    pub fetch_timeout_ms: u64,
    /// Delay before a failed event is re-routed (0 = immediate).
    ///
    /// A delayed re-route is refused or accepted only when it fires; refusals
    /// show up in `DispatchStats::retry_rejected`. Shutdown routes pending
    /// delayed retries at once.
    pub retry_delay_ms: u64,
    /// Number of dispatcher tasks started by `EventRelay::start`
    pub dispatchers: usize,
    /// Bound of the in-memory dead-letter store
    pub dead_letter_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bands: BandCapacities::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            max_retries: 3,
            delivery_timeout_ms: 5_000,
            fetch_timeout_ms: 1_000,
            retry_delay_ms: 0,
            dispatchers: 1,
            dead_letter_capacity: 1_000,
        }
    }
}

/// Parse an environment variable, ignoring (with a warning) bad values
fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

impl RelayConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(raw: &str) -> RelayResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a TOML config file. Not validated: env and CLI layers may still
    /// fix a value, so call [`RelayConfig::validate`] on the final result.
    pub fn load(path: impl AsRef<Path>) -> RelayResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `RELAY_*` environment variables onto this config
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("RELAY_SYSTEM_CAPACITY") {
            self.bands.system = v;
        }
        if let Some(v) = env_parse("RELAY_HIGH_CAPACITY") {
            self.bands.high = v;
        }
        if let Some(v) = env_parse("RELAY_NORMAL_CAPACITY") {
            self.bands.normal = v;
        }
        if let Some(v) = env_parse("RELAY_LOW_CAPACITY") {
            self.bands.low = v;
        }
        if let Some(v) = env_parse("RELAY_FAILURE_THRESHOLD") {
            self.failure_threshold = v;
        }
        if let Some(v) = env_parse("RELAY_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = env_parse("RELAY_DELIVERY_TIMEOUT_MS") {
            self.delivery_timeout_ms = v;
        }
        if let Some(v) = env_parse("RELAY_FETCH_TIMEOUT_MS") {
            self.fetch_timeout_ms = v;
        }
        if let Some(v) = env_parse("RELAY_RETRY_DELAY_MS") {
            self.retry_delay_ms = v;
        }
        if let Some(v) = env_parse("RELAY_DISPATCHERS") {
            self.dispatchers = v;
        }
        if let Some(v) = env_parse("RELAY_DEAD_LETTER_CAPACITY") {
            self.dead_letter_capacity = v;
        }
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> RelayResult<()> {
        let bands = [
            ("system", self.bands.system),
            ("high", self.bands.high),
            ("normal", self.bands.normal),
            ("low", self.bands.low),
        ];
        if let Some((name, _)) = bands.iter().find(|(_, capacity)| *capacity == 0) {
            return Err(RelayError::InvalidConfig(format!(
                "{name} band capacity must be > 0"
            )));
        }
        if self.failure_threshold == 0 {
            return Err(RelayError::InvalidConfig(
                "failure_threshold must be > 0".into(),
            ));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(RelayError::InvalidConfig(
                "delivery_timeout_ms must be > 0".into(),
            ));
        }
        if self.dispatchers == 0 {
            return Err(RelayError::InvalidConfig("dispatchers must be > 0".into()));
        }
        Ok(())
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Retry delay, or `None` for immediate re-routing
    pub fn retry_delay(&self) -> Option<Duration> {
        (self.retry_delay_ms > 0).then(|| Duration::from_millis(self.retry_delay_ms))
    }
}
