//! Relay agent
//!
//! Builds an event relay from layered configuration, runs a synthetic
//! producer/consumer workload through it and prints the resulting stats.
//!
//! # Usage
//!
//! ```bash
//! # Defaults
//! relay-agent
//!
//! # From a config file, with overrides
//! relay-agent --config relay.toml --dispatchers 4 --events 50000
//!
//! # Environment layer
//! RELAY_MAX_RETRIES=1 RUST_LOG=swarm_relay=debug relay-agent --no-flaky
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_agent::{resolve_config, run_workload, CliOverrides, WorkloadSpec};
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML relay config (RELAY_* env vars and flags override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of dispatcher tasks (overrides RELAY_DISPATCHERS)
    #[arg(long)]
    dispatchers: Option<usize>,

    /// Re-routes allowed after a fully failed delivery (overrides RELAY_MAX_RETRIES)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Consecutive failures before a subscription's circuit opens
    #[arg(long)]
    failure_threshold: Option<u32>,

    /// Per-subscription delivery timeout in milliseconds
    #[arg(long)]
    delivery_timeout_ms: Option<u64>,

    /// Delay before re-routing a failed event, in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Number of synthetic events to publish
    #[arg(long, default_value_t = 1_000)]
    events: usize,

    /// Number of concurrent producer tasks
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Skip the always-failing consumer
    #[arg(long, default_value_t = false)]
    no_flaky: bool,

    /// Seconds to wait for the relay to settle after publishing
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Print the report as a single line instead of pretty JSON
    #[arg(long, default_value_t = false)]
    compact: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            dispatchers: self.dispatchers,
            max_retries: self.max_retries,
            failure_threshold: self.failure_threshold,
            delivery_timeout_ms: self.delivery_timeout_ms,
            retry_delay_ms: self.retry_delay_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(args.config.as_deref(), &args.overrides())?;
    info!(
        dispatchers = config.dispatchers,
        max_retries = config.max_retries,
        failure_threshold = config.failure_threshold,
        "Relay agent starting"
    );

    let workload = WorkloadSpec {
        events: args.events,
        producers: args.producers,
        flaky_consumer: !args.no_flaky,
        drain_timeout: Duration::from_secs(args.drain_timeout_secs),
    };
    let report = run_workload(config, &workload).await?;

    let rendered = if args.compact {
        serde_json::to_string(&report)
    } else {
        serde_json::to_string_pretty(&report)
    }
    .context("Failed to serialize workload report")?;
    println!("{rendered}");

    Ok(())
}
