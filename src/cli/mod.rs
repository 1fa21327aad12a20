//! CLI command handling
//!
//! Loads scenario files, drives the runner and formats output.

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::Result;
use crate::runtime::{
    IterationOutcome, ObserverChain, Reporter, RunReport, Runner, StepResult, TestEngine,
    TestSettings, TracingReporter,
};
use crate::script::{build_script, load_script, read_scenario};
use crate::target::ShellTarget;

/// How a finished run is printed
#[derive(Debug, Clone, Copy)]
struct OutputMode {
    json: bool,
    summary: bool,
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            path,
            overrides,
            fail_fast,
            json,
            no_summary,
            config,
        } => {
            let config = match config {
                Some(config_path) => Config::load_from(&config_path)?,
                None => Config::load()?,
            };
            let output = OutputMode {
                json,
                summary: config.output.summary && !no_summary,
            };
            run_scenario(&path, config.settings, overrides.to_settings(fail_fast), output).await
        }

        Commands::Check { path } => check_scenario(&path),
    }
}

/// Commands run from the scenario file's directory
fn scenario_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

async fn run_scenario(
    path: &Path,
    defaults: TestSettings,
    overrides: TestSettings,
    output: OutputMode,
) -> Result<()> {
    let target = Arc::new(ShellTarget::new().with_workdir(scenario_dir(path)));
    let script = load_script(path, target.clone())?;

    if !output.json {
        let name = script.settings.name.clone().unwrap_or_default();
        println!(
            "\n{} {}",
            "Running Scenario:".blue().bold(),
            name.white().bold()
        );
        if let Some(desc) = &script.settings.description {
            println!("  {}", desc.dimmed());
        }
    }

    let reporter: Arc<dyn Reporter> = Arc::new(TracingReporter);
    let observers = ObserverChain::standard(reporter.clone());
    let engine = TestEngine::new(target)
        .with_reporter(reporter)
        .with_observers(Arc::new(observers))
        .with_defaults(defaults);
    let mut runner = Runner::new(engine).with_overrides(overrides);

    let handle = runner.handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, cancelling current iteration...".yellow());
            handle.cancel();
        }
    });
    let report = runner.run(script).await;
    ctrl_c.abort();
    let report = report?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, output.summary);
    }

    report.into_result().map(|_| ())
}

fn check_scenario(path: &Path) -> Result<()> {
    let scenario = read_scenario(path)?;
    let name = scenario.name.clone();
    let script = build_script(scenario, Arc::new(ShellTarget::new()))?;

    println!(
        "{} Scenario '{}' is valid ({} steps)",
        "✓".green(),
        name,
        script.steps.len()
    );
    for (i, step) in script.steps.iter().enumerate() {
        let mut flags = Vec::new();
        let options = &step.options;
        if options.skip {
            flags.push("skip".to_string());
        }
        if options.pending {
            flags.push("pending".to_string());
        }
        if options.once {
            flags.push("once".to_string());
        }
        if let Some(count) = options.repeat {
            flags.push(format!("repeat {count}"));
        }
        if options.predicate.is_some() {
            flags.push("predicate".to_string());
        }
        if options.condition.is_some() {
            flags.push("condition".to_string());
        }
        if script.recovery.contains_key(&step.name) {
            flags.push("recovery".to_string());
        }

        if flags.is_empty() {
            println!("  {}. {}", i + 1, step.name);
        } else {
            println!(
                "  {}. {} {}",
                i + 1,
                step.name,
                format!("[{}]", flags.join(", ")).dimmed()
            );
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, summary: bool) {
    println!();
    for outcome in &report.outcomes {
        print_outcome(outcome, summary);
    }

    let failed = report.failed_count();
    let status = if report.cancelled {
        "Run Cancelled".yellow().bold()
    } else if failed == 0 {
        "Run Passed".green().bold()
    } else {
        "Run Failed".red().bold()
    };
    let mark = if report.passed() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "\n{} {} ({} iterations, {} failed)\n",
        mark, status, report.iterations, failed
    );
}

fn print_outcome(outcome: &IterationOutcome, summary: bool) {
    let mark = if outcome.passed {
        "✓".green()
    } else {
        "✗".red()
    };
    println!(
        "{} Iteration {} {}",
        mark,
        outcome.iteration,
        format!("({} ms)", outcome.elapsed_ms).dimmed()
    );

    if summary {
        for row in &outcome.summary {
            let (symbol, result) = match row.result {
                StepResult::Passed => ("✓".green(), row.result.to_string().green()),
                StepResult::Failed => ("✗".red(), row.result.to_string().red()),
                StepResult::Skipped => ("○".yellow(), row.result.to_string().yellow()),
                StepResult::Unexecuted => ("-".dimmed(), row.result.to_string().dimmed()),
            };
            println!("    {} {} {}", symbol, row.step_name, result);
        }
    }

    if let Some(error) = &outcome.error {
        println!("    {} {}", "error:".red(), error);
    }
}
