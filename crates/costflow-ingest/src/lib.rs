//! Costflow ingestion library
//!
//! Periodic job that pulls cloud billing data into durable destinations.
//!
//! # Overview
//!
//! - **Snapshot cache**: raw billing API responses kept in object storage
//!   ([`cache`])
//! - **Transform**: typed cost, usage, utilization and pricing records, including
//!   the reservation/pricing join ([`transform`])
//! - **Identity**: content-derived record ids and insert-if-absent ([`identity`])
//! - **Dispatch**: named destinations run in order, fail-fast ([`dispatch`])
//!
//! Destinations are a relational database, a BigQuery dataset and Mackerel
//! service metrics.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod billing;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod pipeline;
pub mod sinks;
pub mod storage;
pub mod transform;
pub mod writers;

// Re-export commonly used types
pub use config::{Config, Overrides};
pub use dispatch::Dispatcher;
pub use error::{IngestError, Result};
pub use pipeline::Pipeline;

use clap::{Args, Parser, Subcommand};

/// Costflow - cloud billing ingestion
#[derive(Parser, Debug)]
#[command(name = "costflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute (defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Refresh snapshots and write every configured destination
    Run,

    /// Refresh snapshots only
    Fetch,
}

/// Overrides for the matching environment variables
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Comma-separated destinations (OUTPUT)
    #[arg(long, global = true)]
    pub output: Option<String>,

    /// Comma-separated periods such as `1m,1d` (PERIOD)
    #[arg(long, global = true)]
    pub period: Option<String>,

    /// Comma-separated pricing regions (REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Suppress join and duplicate warnings (SUPPRESS_WARNING)
    #[arg(long, global = true)]
    pub suppress_warning: Option<bool>,
}

impl Cli {
    pub fn resolved_command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}

impl From<&OverrideArgs> for Overrides {
    fn from(args: &OverrideArgs) -> Self {
        Self {
            output: args.output.clone(),
            period: args.period.clone(),
            region: args.region.clone(),
            suppress_warning: args.suppress_warning,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["costflow"]).unwrap();
        assert_eq!(cli.resolved_command(), Commands::Run);
    }

    #[test]
    fn test_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "costflow",
            "fetch",
            "--period",
            "7d",
            "--suppress-warning",
            "false",
        ])
        .unwrap();

        let overrides = Overrides::from(&cli.overrides);
        assert_eq!(cli.resolved_command(), Commands::Fetch);
        assert_eq!(overrides.period.as_deref(), Some("7d"));
        assert_eq!(overrides.suppress_warning, Some(false));
        assert!(overrides.output.is_none());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        <Cli as CommandFactory>::command().debug_assert();
    }
}
