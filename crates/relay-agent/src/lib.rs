//! Relay agent: wires a [`swarm_relay::EventRelay`] from layered
//! configuration and drives it with a synthetic swarm workload.

pub mod settings;
pub mod workload;

pub use settings::{resolve_config, CliOverrides};
pub use workload::{run_workload, WorkloadReport, WorkloadSpec};
