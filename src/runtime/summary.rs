//! Per-iteration execution summary rows

use std::fmt;

use serde::Serialize;

/// Outcome recorded for one step-execution decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepResult {
    Passed,
    Failed,
    Skipped,
    Unexecuted,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepResult::Passed => write!(f, "PASSED"),
            StepResult::Failed => write!(f, "FAILED"),
            StepResult::Skipped => write!(f, "SKIPPED"),
            StepResult::Unexecuted => write!(f, "UNEXECUTED"),
        }
    }
}

/// One summary row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryStep {
    pub step_name: String,
    pub result: StepResult,
}

impl SummaryStep {
    pub fn new(step_name: impl Into<String>, result: StepResult) -> Self {
        Self {
            step_name: step_name.into(),
            result,
        }
    }
}

/// Ordered summary rows for the current summarization cycle
#[derive(Debug, Clone, Default)]
pub struct Summary {
    rows: Vec<SummaryStep>,
}

impl Summary {
    /// Append a row
    pub fn push(&mut self, step_name: &str, result: StepResult) {
        tracing::trace!(step = step_name, %result, "Summary row");
        self.rows.push(SummaryStep::new(step_name, result));
    }

    pub fn rows(&self) -> &[SummaryStep] {
        &self.rows
    }

    /// Start a new summarization cycle
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Number of rows with the given result
    pub fn count(&self, result: StepResult) -> usize {
        self.rows.iter().filter(|row| row.result == result).count()
    }
}
