//! Scenario CLI - run scripted multi-step test scenarios
//!
//! Loads a YAML scenario, runs it for as many iterations as its settings
//! allow and prints a per-step summary of every iteration.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use scenario::common::{logging, paths};
use scenario::{cli, commands};

#[derive(Parser)]
#[command(name = "scenario", about = "Scripted multi-step test scenario runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Debug-level logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write logs to a daily file in DIR (the platform data dir when omitted)
    #[arg(long, global = true, value_name = "DIR", num_args = 0..=1)]
    log_dir: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Keep the file writer alive until the run is over
    let log_dir = cli
        .log_dir
        .clone()
        .map(|dir| dir.or_else(paths::log_dir));
    let guard = match log_dir {
        Some(Some(dir)) => logging::init_file(&dir, cli.verbose),
        Some(None) => {
            logging::init_cli(cli.verbose);
            tracing::warn!("No platform data directory, logging to stderr only");
            None
        }
        None => {
            logging::init_cli(cli.verbose);
            None
        }
    };

    let result = cli::dispatch(cli.command).await;
    drop(guard);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
