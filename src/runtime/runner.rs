//! Runner
//!
//! Owns a [`TestEngine`] across iterations, applies the [`Looper`] and turns
//! each iteration's outcome into a [`RunReport`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::common::{Error, Result};

use super::cancel::CancellationToken;
use super::engine::TestEngine;
use super::looper::{Iterate, Looper, LooperHandle};
use super::reporter::Reporter;
use super::settings::TestSettings;
use super::step::Script;
use super::summary::{StepResult, SummaryStep};

/// Cloneable remote control for a running [`Runner`]
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    cancel: CancellationToken,
    looper: LooperHandle,
}

impl RunnerHandle {
    /// Abandon the current iteration and start no further ones
    pub fn cancel(&self) {
        self.looper.stop();
        self.cancel.cancel();
    }

    /// Let the current iteration finish, then stop
    pub fn stop(&self) {
        self.looper.stop();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancellation_requested()
    }
}

/// Outcome of one iteration
#[derive(Debug, Clone, Serialize)]
pub struct IterationOutcome {
    pub iteration: u32,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub summary: Vec<SummaryStep>,
    pub elapsed_ms: u64,
}

impl IterationOutcome {
    pub fn count(&self, result: StepResult) -> usize {
        self.summary.iter().filter(|row| row.result == result).count()
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub iterations: u32,
    pub cancelled: bool,
    pub outcomes: Vec<IterationOutcome>,
}

impl RunReport {
    /// True when every iteration that ran passed and the run was not cancelled
    pub fn passed(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(|outcome| outcome.passed)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.passed).count()
    }

    /// `Err(RunFailed)` unless every iteration passed
    pub fn into_result(self) -> Result<RunReport> {
        if self.passed() {
            Ok(self)
        } else {
            Err(Error::RunFailed {
                failed: self.failed_count(),
                total: self.iterations,
            })
        }
    }
}

/// Drives one [`TestEngine`] through as many iterations as the settings allow
pub struct Runner {
    engine: TestEngine,
    overrides: TestSettings,
    handle: RunnerHandle,
}

impl Runner {
    pub fn new(engine: TestEngine) -> Self {
        let handle = RunnerHandle {
            cancel: engine.cancellation_token(),
            looper: LooperHandle::new(),
        };
        Self {
            engine,
            overrides: TestSettings::default(),
            handle,
        }
    }

    /// Caller overrides applied on top of the script's settings
    pub fn with_overrides(mut self, overrides: TestSettings) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn handle(&self) -> RunnerHandle {
        self.handle.clone()
    }

    pub fn engine(&self) -> &TestEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TestEngine {
        &mut self.engine
    }

    /// Enqueue `script` and loop it; iteration failures end up in the report
    pub async fn run(&mut self, script: Script) -> Result<RunReport> {
        let settings = self.engine.enqueue_script(script, &self.overrides)?;
        let reporter = self.engine.reporter();

        tracing::info!(
            name = %settings.name,
            loop_count = settings.loop_count,
            duration = ?settings.duration,
            "Starting run"
        );

        let mut looper =
            Looper::from_settings(&settings, true).with_handle(self.handle.looper.clone());
        let mut driver = IterationDriver {
            engine: &mut self.engine,
            reporter,
            looper: self.handle.looper.clone(),
            fail_fast: settings.fail_fast,
            outcomes: Vec::new(),
        };
        let iterations = looper.run(&mut driver).await;
        let outcomes = driver.outcomes;

        let report = RunReport {
            name: settings.name,
            iterations,
            cancelled: self.handle.is_cancelled(),
            outcomes,
        };
        tracing::info!(
            iterations = report.iterations,
            failed = report.failed_count(),
            cancelled = report.cancelled,
            "Run finished"
        );
        Ok(report)
    }
}

struct IterationDriver<'a> {
    engine: &'a mut TestEngine,
    reporter: Arc<dyn Reporter>,
    looper: LooperHandle,
    fail_fast: bool,
    outcomes: Vec<IterationOutcome>,
}

#[async_trait]
impl Iterate for IterationDriver<'_> {
    async fn iterate(&mut self, iteration: u32) {
        self.engine.reset_summarize_step();
        let started = Instant::now();
        let result = self.engine.run(Some(iteration)).await;

        let (error, code) = match &result {
            Ok(()) => (None, None),
            Err(e) if e.is_cancelled() => {
                self.reporter
                    .warn(&format!("Iteration {iteration} cancelled"));
                self.looper.stop();
                (Some(e.to_string()), Some(e.code()))
            }
            Err(e) => {
                match e {
                    // already reported through the observers
                    Error::StepFailed { .. } => self
                        .reporter
                        .error(&format!("Iteration {iteration} aborted: {e}")),
                    _ => self
                        .reporter
                        .test_internal_error(&format!("Iteration {iteration} failed"), e),
                }
                if self.fail_fast {
                    tracing::info!(iteration, "Fail-fast enabled, stopping run");
                    self.looper.stop();
                }
                (Some(e.to_string()), Some(e.code()))
            }
        };

        self.outcomes.push(IterationOutcome {
            iteration,
            passed: result.is_ok(),
            error,
            code,
            summary: self.engine.summarize_step().to_vec(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }
}
