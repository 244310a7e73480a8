//! Command line interface.
//!
//! Global flags override the matching keys of the configuration file.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use smsrelay::config::RelayConfig;
use smsrelay::gateway::LoopbackOptions;

/// Dispatches queued SMS jobs and reconciles their delivery state.
#[derive(Debug, Parser)]
#[command(name = "smsrelay", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./smsrelay.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store messages as `sent` as soon as the job is expanded.
    #[arg(long, global = true, default_value_t = false)]
    pub optimistic_sent: bool,

    /// Discard delivery reports; jobs complete once every message is sent.
    #[arg(long, global = true, default_value_t = false)]
    pub ignore_delivery_reports: bool,

    /// Seconds between reconciliation passes.
    #[arg(long, global = true)]
    pub sync_interval_secs: Option<u64>,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn apply_overrides(&self, config: &mut RelayConfig) {
        if self.optimistic_sent {
            config.optimistic_sent_on_dispatch = true;
        }
        if self.ignore_delivery_reports {
            config.ignore_delivery_reports = true;
        }
        if let Some(secs) = self.sync_interval_secs {
            config.sync_interval_secs = secs;
        }
        if self.verbose {
            config.log_filter = "debug".to_string();
        }
    }
}

/// How the simulated transport behaves during `run` and `demo`.
#[derive(Debug, Clone, Args)]
pub struct SimulationArgs {
    /// Never emit delivery reports; only reconciliation can mark delivery.
    #[arg(long, default_value_t = false)]
    pub drop_delivery_reports: bool,

    /// Emit delivery reports ahead of the sent reports.
    #[arg(long, default_value_t = false)]
    pub delivered_before_sent: bool,

    /// Give up waiting for jobs to settle after this many seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl SimulationArgs {
    pub fn loopback_options(&self) -> LoopbackOptions {
        LoopbackOptions {
            drop_delivery_reports: self.drop_delivery_reports,
            delivered_before_sent: self.delivered_before_sent,
            ..Default::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load jobs from a JSON or TOML file and run them against the loopback transport.
    Run {
        /// Path to the job file.
        #[arg(long)]
        file: PathBuf,

        #[command(flatten)]
        simulation: SimulationArgs,
    },

    /// Run the built-in demonstration jobs.
    Demo {
        #[command(flatten)]
        simulation: SimulationArgs,
    },

    /// Print the effective configuration as TOML.
    Config,
}
