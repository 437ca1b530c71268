//! Config resolution for the agent: file, then `RELAY_*` env, then CLI flags.

use std::path::Path;

use anyhow::{Context, Result};
use swarm_relay::RelayConfig;

/// Values supplied on the command line. `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub dispatchers: Option<usize>,
    pub max_retries: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub delivery_timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(v) = self.dispatchers {
            config.dispatchers = v;
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.failure_threshold {
            config.failure_threshold = v;
        }
        if let Some(v) = self.delivery_timeout_ms {
            config.delivery_timeout_ms = v;
        }
        if let Some(v) = self.retry_delay_ms {
            config.retry_delay_ms = v;
        }
    }
}

/// Build the effective relay configuration
pub fn resolve_config(path: Option<&Path>, overrides: &CliOverrides) -> Result<RelayConfig> {
    let mut config = match path {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("Failed to load relay config from {}", path.display()))?,
        None => RelayConfig::default(),
    };
    config.apply_env();
    overrides.apply(&mut config);
    config
        .validate()
        .context("Effective relay configuration is invalid")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(None, &CliOverrides::default()).unwrap();
        assert_eq!(config.bands.normal, RelayConfig::default().bands.normal);
    }

    #[test]
    fn test_file_values_are_loaded() {
        let file = write_config("dead_letter_capacity = 7\n\n[bands]\nlow = 12\n");
        let config = resolve_config(Some(file.path()), &CliOverrides::default()).unwrap();
        assert_eq!(config.dead_letter_capacity, 7);
        assert_eq!(config.bands.low, 12);
    }

    #[test]
    fn test_cli_overrides_win_over_file() {
        let file = write_config("dispatchers = 2\nmax_retries = 9\n");
        let overrides = CliOverrides {
            dispatchers: Some(6),
            ..Default::default()
        };
        let config = resolve_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.dispatchers, 6);
        assert_eq!(config.max_retries, 9);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let file = write_config("dispatchers = \"lots\"\n");
        let err = resolve_config(Some(file.path()), &CliOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to load relay config"));
    }

    #[test]
    fn test_override_repairs_invalid_file_value() {
        let file = write_config("dispatchers = 0\n");
        let overrides = CliOverrides {
            dispatchers: Some(3),
            ..Default::default()
        };
        let config = resolve_config(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.dispatchers, 3);

        let err = resolve_config(Some(file.path()), &CliOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("Effective relay configuration is invalid"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = CliOverrides {
            dispatchers: Some(0),
            ..Default::default()
        };
        assert!(resolve_config(None, &overrides).is_err());
    }
}
