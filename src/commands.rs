//! CLI command definitions
//!
//! Defines the clap commands for the scenario CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::common::parse_secs;
use crate::runtime::TestSettings;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a YAML scenario file
    Run {
        /// Path to the scenario file
        path: PathBuf,

        #[command(flatten)]
        overrides: RunOverrides,

        /// Stop after the first failed iteration
        #[arg(long)]
        fail_fast: bool,

        /// Print the run report as JSON instead of the summary table
        #[arg(long)]
        json: bool,

        /// Don't print per-iteration step rows
        #[arg(long)]
        no_summary: bool,

        /// Configuration file to use instead of the default one
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse a scenario file and list its steps without running anything
    Check {
        /// Path to the scenario file
        path: PathBuf,
    },
}

/// Settings given on the command line; they win over the file and config
#[derive(clap::Args, Debug, Default)]
pub struct RunOverrides {
    /// Number of iterations (0 or less loops until --duration or Ctrl-C)
    #[arg(long, allow_negative_numbers = true)]
    pub loop_count: Option<i64>,

    /// Stop starting new iterations after this many seconds
    #[arg(long, value_parser = parse_secs)]
    pub duration: Option<f64>,

    /// Recovery attempts for failed steps
    #[arg(long)]
    pub tries: Option<u32>,

    /// Pause between steps, in seconds
    #[arg(long, value_parser = parse_secs)]
    pub step_delay: Option<f64>,

    /// Deadline for each command and hook, in seconds
    #[arg(long, value_parser = parse_secs)]
    pub wait_timeout: Option<f64>,
}

impl RunOverrides {
    pub fn to_settings(&self, fail_fast: bool) -> TestSettings {
        TestSettings {
            loop_count: self.loop_count,
            duration_secs: self.duration,
            tries: self.tries,
            step_delay_secs: self.step_delay,
            wait_timeout_secs: self.wait_timeout,
            fail_fast: fail_fast.then_some(true),
            ..Default::default()
        }
    }
}
