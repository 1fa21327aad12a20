//! Step traversal
//!
//! The [`StepIterator`] owns traversal order, gating, recovery dispatch and
//! unexecuted-step accounting for one iteration. Execution state lives here,
//! indexed like the script's steps, and is rebuilt for every iteration; the
//! step definitions themselves are never touched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::Result;

use super::step::{Predicate, RecoverySequence, Step};
use super::summary::{StepResult, Summary};
use super::target::ExecutionTarget;

/// Planned and completed repetitions of a repeat step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepeatDescriptor {
    pub count: u32,
    pub iteration: u32,
}

/// Engine-owned scratch state for one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepState {
    pub executed: bool,
    pub recovery_tries: u32,
    pub repeat: Option<RepeatDescriptor>,
}

/// Position handed to the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepVisit {
    pub index: usize,
    /// 1-based repetition number
    pub repetition: u32,
    /// Planned repetitions (1 for plain steps)
    pub repetitions: u32,
}

/// Executes one visited step
#[async_trait]
pub trait StepExecutor: Send {
    async fn execute(&mut self, iterator: &mut StepIterator, visit: StepVisit) -> Result<()>;
}

/// Runs the steps of a recovery sequence
#[async_trait]
pub trait RecoveryExecutor: Send {
    async fn run_recovery_step(&mut self, step: &Step, label: &str) -> anyhow::Result<()>;

    /// Recovery stops early once this reports true
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Traversal state for one iteration
#[derive(Debug, Clone)]
pub struct StepIterator {
    names: Vec<String>,
    states: Vec<StepState>,
}

impl StepIterator {
    pub fn new(steps: &[Step]) -> Self {
        Self {
            names: steps.iter().map(|step| step.name.clone()).collect(),
            states: steps
                .iter()
                .map(|step| StepState {
                    repeat: step.options.repeat.map(|count| RepeatDescriptor {
                        count: count.max(1),
                        iteration: 0,
                    }),
                    ..Default::default()
                })
                .collect(),
        }
    }

    pub fn state(&self, index: usize) -> &StepState {
        &self.states[index]
    }

    /// Visit every step in declaration order, one repetition at a time.
    ///
    /// Stops at the first error the executor returns.
    pub async fn run<E>(&mut self, executor: &mut E) -> Result<()>
    where
        E: StepExecutor + ?Sized,
    {
        for index in 0..self.states.len() {
            let repetitions = self.states[index].repeat.map_or(1, |repeat| repeat.count);
            for repetition in 1..=repetitions {
                let state = &mut self.states[index];
                state.executed = false;
                state.recovery_tries = 0;

                executor
                    .execute(
                        self,
                        StepVisit {
                            index,
                            repetition,
                            repetitions,
                        },
                    )
                    .await?;
            }
            if let Some(repeat) = self.states[index].repeat.as_mut() {
                repeat.iteration = 0;
            }
        }
        Ok(())
    }

    /// Record that a decision was reached for the current attempt of `index`
    pub fn mark_executed(&mut self, index: usize) {
        let state = &mut self.states[index];
        state.executed = true;
        if let Some(repeat) = state.repeat.as_mut() {
            repeat.iteration += 1;
        }
    }

    /// Apply once/pending/skip/condition gating.
    ///
    /// Returns false (after recording the row) when the step body must not run.
    pub async fn call_condition(
        &mut self,
        index: usize,
        step: &Step,
        iteration: u32,
        target: &Arc<dyn ExecutionTarget>,
        summary: &mut Summary,
    ) -> bool {
        let options = &step.options;
        let excluded = if options.pending {
            tracing::debug!(step = %step.name, "Step is pending");
            Some(StepResult::Unexecuted)
        } else if options.once && iteration > 1 {
            tracing::debug!(step = %step.name, iteration, "Once-only step already ran");
            Some(StepResult::Unexecuted)
        } else if options.skip {
            tracing::debug!(step = %step.name, "Step skipped");
            Some(StepResult::Skipped)
        } else if let Some(condition) = &options.condition {
            match condition.admits(target.clone()).await {
                Ok(true) => None,
                Ok(false) => Some(StepResult::Skipped),
                Err(e) => {
                    tracing::warn!(step = %step.name, error = %e, "Step condition failed, skipping");
                    Some(StepResult::Skipped)
                }
            }
        } else {
            None
        };

        match excluded {
            Some(result) => {
                summary.push(&step.name, result);
                self.mark_executed(index);
                false
            }
            None => true,
        }
    }

    /// Evaluate a step's runtime predicate; errors count as false
    pub async fn call_predicate(
        &self,
        predicate: &Predicate,
        target: &Arc<dyn ExecutionTarget>,
    ) -> bool {
        match predicate.evaluate(target.clone()).await {
            Ok(admitted) => admitted,
            Err(e) => {
                tracing::warn!(error = %e, "Step predicate failed");
                false
            }
        }
    }

    /// Run the recovery sequence registered for the failed step at `index`.
    ///
    /// Returns true once a full pass of the sequence succeeds, false when no
    /// sequence is registered or every allowed attempt failed.
    pub async fn call_recovery<R>(
        &mut self,
        index: usize,
        recovery: &HashMap<String, RecoverySequence>,
        tries_override: Option<u32>,
        executor: &mut R,
    ) -> bool
    where
        R: RecoveryExecutor + ?Sized,
    {
        let name = self.names[index].clone();
        let Some(sequence) = recovery.get(&name) else {
            tracing::debug!(step = %name, "No recovery registered");
            return false;
        };
        let tries = sequence.tries.or(tries_override).unwrap_or(1).max(1);

        loop {
            if executor.is_cancelled() {
                return false;
            }
            let state = &mut self.states[index];
            if state.recovery_tries >= tries {
                tracing::warn!(step = %name, tries, "Recovery attempts exhausted");
                return false;
            }
            state.recovery_tries += 1;
            let label = format!("{} ({} recovery)", name, ordinal(state.recovery_tries));

            match run_sequence(&sequence.steps, &label, executor).await {
                Ok(()) => {
                    tracing::info!(step = %name, attempt = %label, "Recovery succeeded");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(step = %name, attempt = %label, error = %e, "Recovery attempt failed");
                }
            }
        }
    }

    /// Emit an unexecuted row for every step (or remaining repetition) not reached
    pub fn loop_unexecuted_steps<F>(&mut self, mut visit: F)
    where
        F: FnMut(&str, StepResult),
    {
        for (name, state) in self.names.iter().zip(self.states.iter_mut()) {
            match state.repeat.as_mut() {
                Some(repeat) if repeat.iteration > 0 => {
                    let mut remaining = repeat.count.saturating_sub(repeat.iteration);
                    while remaining > 0 {
                        visit(name, StepResult::Unexecuted);
                        remaining -= 1;
                    }
                    repeat.iteration = 0;
                }
                _ if !state.executed => visit(name, StepResult::Unexecuted),
                _ => {}
            }
        }
    }
}

async fn run_sequence<R>(steps: &[Step], label: &str, executor: &mut R) -> anyhow::Result<()>
where
    R: RecoveryExecutor + ?Sized,
{
    for step in steps {
        executor.run_recovery_step(step, label).await?;
    }
    Ok(())
}

/// `1st`, `2nd`, `3rd`, `4th`, ... `11th`, `12th`, `13th`, `21st`
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
