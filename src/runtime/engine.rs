//! Test engine
//!
//! Executes one complete iteration of an enqueued [`Script`]:
//!
//! ```text
//! Setup -> before_all -> steps { before_each -> gate -> race(body, cancel)
//!       -> [error -> recovery -> continue | abort] -> after_each }
//!       -> teardown (always) -> after_all (always) -> observers.after (always)
//! ```
//!
//! The engine never prints. Lifecycle transitions go to the observer chain,
//! terminal failures to the reporter.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::common::{Error, Result};

use super::cancel::CancellationToken;
use super::classify::classify;
use super::iterator::{RecoveryExecutor, StepExecutor, StepIterator, StepVisit};
use super::observer::{NullObserver, Observer, StepInfo, TestInfo};
use super::reporter::{NullReporter, Reporter};
use super::settings::{ConcreteSettings, TestSettings};
use super::step::{Action, Hook, HookPhase, Script, Step, StepContext};
use super::summary::{StepResult, Summary, SummaryStep};
use super::target::{CurrentStep, ExecutionTarget, Interceptor, NoopInterceptor};

/// Restores the target's previous settings when dropped
struct SettingsGuard {
    target: Arc<dyn ExecutionTarget>,
    previous: Option<ConcreteSettings>,
}

impl SettingsGuard {
    fn apply(target: &Arc<dyn ExecutionTarget>, settings: ConcreteSettings) -> Self {
        let previous = target.settings();
        target.apply_settings(settings);
        Self {
            target: target.clone(),
            previous: Some(previous),
        }
    }
}

impl Drop for SettingsGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.target.apply_settings(previous);
        }
    }
}

/// Runs iterations of one script against one execution target
pub struct TestEngine {
    target: Arc<dyn ExecutionTarget>,
    interceptor: Arc<dyn Interceptor>,
    observers: Arc<dyn Observer>,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
    defaults: TestSettings,
    script: Option<Arc<Script>>,
    settings: ConcreteSettings,
    summary: Summary,
    iteration: u32,
    failed: bool,
    sub_title: Option<String>,
}

impl TestEngine {
    /// Engine with inert collaborators; swap them in with the `with_*` builders
    pub fn new(target: Arc<dyn ExecutionTarget>) -> Self {
        Self {
            target,
            interceptor: Arc::new(NoopInterceptor),
            observers: Arc::new(NullObserver),
            reporter: Arc::new(NullReporter),
            cancel: CancellationToken::new(),
            defaults: TestSettings::default(),
            script: None,
            settings: ConcreteSettings::default(),
            summary: Summary::default(),
            iteration: 0,
            failed: false,
            sub_title: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Observer notified of every transition (usually an `ObserverChain`)
    pub fn with_observers(mut self, observers: Arc<dyn Observer>) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Settings layered beneath every script (e.g. from the config file)
    pub fn with_defaults(mut self, defaults: TestSettings) -> Self {
        self.defaults = defaults;
        self
    }

    /// Validate and install `script`, resolving its settings.
    ///
    /// Precedence, lowest first: built-in defaults, engine defaults, script
    /// settings, `overrides`.
    pub fn enqueue_script(
        &mut self,
        script: Script,
        overrides: &TestSettings,
    ) -> Result<ConcreteSettings> {
        script.validate()?;
        self.defaults.validate()?;
        overrides.validate()?;
        let settings = ConcreteSettings::default()
            .apply(&self.defaults)
            .apply(&script.settings)
            .apply(overrides);

        tracing::debug!(
            name = %settings.name,
            steps = script.steps.len(),
            loop_count = settings.loop_count,
            "Script enqueued"
        );

        self.target.apply_settings(settings.clone());
        self.settings = settings.clone();
        self.script = Some(Arc::new(script));
        self.summary.clear();
        self.iteration = 0;
        self.failed = false;
        Ok(settings)
    }

    pub fn step_names(&self) -> Vec<String> {
        self.script
            .as_ref()
            .map(|script| script.step_names())
            .unwrap_or_default()
    }

    /// Summary rows accumulated since the last reset
    pub fn summarize_step(&self) -> &[SummaryStep] {
        self.summary.rows()
    }

    pub fn reset_summarize_step(&mut self) {
        self.summary.clear();
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Label of whatever is running right now (step, repetition or recovery)
    pub fn sub_title(&self) -> Option<&str> {
        self.sub_title.as_deref()
    }

    pub fn settings(&self) -> &ConcreteSettings {
        &self.settings
    }

    pub fn reporter(&self) -> Arc<dyn Reporter> {
        self.reporter.clone()
    }

    /// Token shared with step bodies; cancel it from another task to stop a run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mark the engine failed, request cancellation and run the cleanup
    /// that an interrupted iteration would have run.
    pub async fn cancel(&mut self) {
        tracing::info!(iteration = self.iteration, "Cancelling test engine");
        self.failed = true;
        self.cancel.cancel();
        if let Err(e) = self.interceptor.detach(self.target.as_ref()).await {
            tracing::warn!(error = %e, "Failed to detach interceptor");
        }
        self.sub_title = None;
        self.target.set_current_step(None);
        self.observers.after(&self.test_info()).await;
    }

    /// Execute one iteration. `None` continues numbering from the last run.
    #[tracing::instrument(skip(self), name = "iteration")]
    pub async fn run(&mut self, iteration: Option<u32>) -> Result<()> {
        let script = self.script.clone().ok_or(Error::NoScript)?;
        self.iteration = iteration.unwrap_or(self.iteration + 1);
        self.failed = false;
        self.sub_title = None;

        let mut iterator = StepIterator::new(&script.steps);
        let mut data = Arc::new(Value::Null);
        self.observers.before(&self.test_info()).await;

        let outcome = self.execute(&script, &mut iterator, &mut data).await;
        if let Err(e) = &outcome {
            self.failed = true;
            tracing::debug!(error = %e, code = e.code(), "Iteration aborted");
        }

        self.teardown(&mut iterator).await;

        let after_all = self
            .run_hooks(HookPhase::AfterAll, &script.hooks.after_all, &data)
            .await;
        let outcome = match (outcome, after_all) {
            (Err(e), Err(after)) => {
                self.reporter
                    .test_internal_error("after_all hook failed during cleanup", &after);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(after)) => {
                self.failed = true;
                Err(after)
            }
            (Ok(()), Ok(())) => Ok(()),
        };

        self.observers.after(&self.test_info()).await;
        outcome
    }

    fn test_info(&self) -> TestInfo {
        TestInfo {
            name: self.settings.name.clone(),
            iteration: self.iteration,
            failed: self.failed,
        }
    }

    /// Setup, `before_all` and the step loop; anything here may abort
    async fn execute(
        &mut self,
        script: &Script,
        iterator: &mut StepIterator,
        data: &mut Arc<Value>,
    ) -> Result<()> {
        self.interceptor
            .attach(self.target.as_ref())
            .await
            .map_err(Error::Target)?;
        self.apply_directives().await?;

        let record = script.data.feed().ok_or(Error::DataExhausted)?;
        *data = Arc::new(record);

        self.run_hooks(HookPhase::BeforeAll, &script.hooks.before_all, data)
            .await?;

        let mut visitor = StepVisitor {
            engine: self,
            script,
            data: data.clone(),
        };
        iterator.run(&mut visitor).await
    }

    /// One-shot directives, in fixed order, each only when configured
    async fn apply_directives(&self) -> Result<()> {
        let settings = &self.settings;
        let target = &self.target;

        if settings.clear_cache {
            target.clear_cache().await.map_err(Error::Target)?;
        }
        if settings.clear_cookies {
            target.clear_cookies().await.map_err(Error::Target)?;
        }
        if let Some(device) = &settings.device {
            target.emulate_device(device).await.map_err(Error::Target)?;
        }
        if let Some(user_agent) = &settings.user_agent {
            target
                .set_user_agent(user_agent)
                .await
                .map_err(Error::Target)?;
        }
        if settings.disable_cache {
            target
                .set_cache_disabled(true)
                .await
                .map_err(Error::Target)?;
        }
        if !settings.extra_headers.is_empty() {
            target
                .set_extra_headers(&settings.extra_headers)
                .await
                .map_err(Error::Target)?;
        }
        Ok(())
    }

    async fn teardown(&mut self, iterator: &mut StepIterator) {
        if let Err(e) = self.interceptor.detach(self.target.as_ref()).await {
            tracing::warn!(error = %e, "Failed to detach interceptor");
        }
        self.sub_title = None;
        self.target.set_current_step(None);

        let summary = &mut self.summary;
        iterator.loop_unexecuted_steps(|name, result| summary.push(name, result));
    }

    /// Run each hook of `phase` in order, every one bounded by its own timeout
    async fn run_hooks(&self, phase: HookPhase, hooks: &[Hook], data: &Arc<Value>) -> Result<()> {
        for hook in hooks {
            // after_all belongs to cleanup and runs even when cancelled
            if phase != HookPhase::AfterAll {
                self.cancel.check()?;
            }

            let hook_settings = self.target.settings().with_wait_timeout(hook.wait_timeout);
            let _restore = SettingsGuard::apply(&self.target, hook_settings);
            let ctx = self.context(phase.to_string(), data);

            tracing::debug!(%phase, timeout = ?hook.wait_timeout, "Running hook");
            match tokio::time::timeout(hook.wait_timeout, hook.action.call(ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(Error::hook(phase, e)),
                Err(_) => {
                    return Err(Error::HookTimeout {
                        phase,
                        timeout_secs: hook.wait_timeout.as_secs_f64(),
                    })
                }
            }
        }
        Ok(())
    }

    fn context(&self, label: String, data: &Arc<Value>) -> StepContext {
        StepContext {
            target: self.target.clone(),
            data: data.clone(),
            iteration: self.iteration,
            label,
            cancel: self.cancel.clone(),
        }
    }

    /// Race a body against cancellation with the step's settings in effect.
    ///
    /// `None` means cancellation won; the body is abandoned, not stopped.
    async fn race_body(
        &self,
        action: &Action,
        overrides: &TestSettings,
        label: &str,
        data: &Arc<Value>,
    ) -> Option<anyhow::Result<()>> {
        let _restore =
            SettingsGuard::apply(&self.target, self.settings.apply(&overrides.per_step()));
        let body = tokio::spawn(action.call(self.context(label.to_string(), data)));

        let joined = self.cancel.run_until_cancelled(body).await?;
        Some(joined.unwrap_or_else(|e| Err(anyhow::anyhow!("step body panicked: {e}"))))
    }

    fn set_current_step(&self, step: &StepInfo) {
        self.target.set_current_step(Some(CurrentStep::new(
            step.clone(),
            self.test_info(),
            self.observers.clone(),
        )));
    }
}

/// Executes visited steps on behalf of the iterator
struct StepVisitor<'a> {
    engine: &'a mut TestEngine,
    script: &'a Script,
    data: Arc<Value>,
}

impl<'a> StepVisitor<'a> {
    fn step_settings(&self, step: &Step) -> ConcreteSettings {
        self.engine
            .settings
            .apply(&step.options.settings.per_step())
    }

    /// Condition then predicate. False means the body must not run.
    async fn gate(&mut self, iterator: &mut StepIterator, index: usize, step: &Step) -> bool {
        let engine = &mut *self.engine;
        let target = engine.target.clone();
        if !iterator
            .call_condition(index, step, engine.iteration, &target, &mut engine.summary)
            .await
        {
            return false;
        }

        if let Some(predicate) = &step.options.predicate {
            if !iterator.call_predicate(predicate, &target).await {
                tracing::debug!(step = %step.name, "Predicate not met, bypassing step");
                iterator.mark_executed(index);
                return false;
            }
        }
        true
    }

    async fn run_step(
        &mut self,
        iterator: &mut StepIterator,
        visit: StepVisit,
        step: &'a Step,
    ) -> Result<()> {
        let label = if visit.repetitions > 1 {
            format!("{} ({}/{})", step.name, visit.repetition, visit.repetitions)
        } else {
            step.name.clone()
        };
        let info = StepInfo::new(&step.name, &label);

        self.engine.sub_title = Some(label.clone());
        self.engine.set_current_step(&info);
        self.engine
            .observers
            .before_step(&self.engine.test_info(), &info)
            .await;

        let data = self.data.clone();
        let outcome = self
            .engine
            .race_body(&step.action, &step.options.settings, &label, &data)
            .await;

        let Some(outcome) = outcome else {
            tracing::info!(step = %label, "Step abandoned after cancellation");
            self.engine.failed = true;
            self.engine
                .observers
                .after_step(&self.engine.test_info(), &info)
                .await;
            return Err(Error::Cancelled);
        };

        match outcome {
            Ok(()) => {
                iterator.mark_executed(visit.index);
                self.engine
                    .observers
                    .on_step_passed(&self.engine.test_info(), &info)
                    .await;
                self.engine.summary.push(&step.name, StepResult::Passed);
                self.engine
                    .observers
                    .after_step(&self.engine.test_info(), &info)
                    .await;
                self.engine.target.set_current_step(None);

                let step_delay = self.step_settings(step).step_delay;
                if !self.engine.failed && !step_delay.is_zero() {
                    let delay = tokio::time::sleep(step_delay);
                    if self.engine.cancel.run_until_cancelled(delay).await.is_none() {
                        self.engine.failed = true;
                        return Err(Error::Cancelled);
                    }
                }
                Ok(())
            }
            Err(e) => {
                let error = classify(e);
                self.engine.failed = true;
                iterator.mark_executed(visit.index);
                self.engine
                    .observers
                    .on_step_error(&self.engine.test_info(), &info, &error)
                    .await;
                self.engine.summary.push(&step.name, StepResult::Failed);
                self.engine
                    .observers
                    .after_step(&self.engine.test_info(), &info)
                    .await;
                self.engine.target.set_current_step(None);

                let tries = self.step_settings(step).tries;
                let script: &'a Script = self.script;
                let recovered = iterator
                    .call_recovery(visit.index, &script.recovery, Some(tries), self)
                    .await;

                self.engine.sub_title = Some(label.clone());
                self.engine.target.set_current_step(None);
                if self.engine.cancel.is_cancellation_requested() {
                    return Err(Error::Cancelled);
                }
                if recovered {
                    self.engine.failed = false;
                    self.engine
                        .reporter
                        .info(&format!("Step '{label}' recovered, continuing"));
                    Ok(())
                } else {
                    Err(Error::step_failed(&step.name, error))
                }
            }
        }
    }
}

#[async_trait]
impl<'a> StepExecutor for StepVisitor<'a> {
    async fn execute(&mut self, iterator: &mut StepIterator, visit: StepVisit) -> Result<()> {
        let script: &'a Script = self.script;
        let step = &script.steps[visit.index];

        self.engine.cancel.check()?;
        self.engine
            .run_hooks(HookPhase::BeforeEach, &script.hooks.before_each, &self.data)
            .await?;

        if self.gate(iterator, visit.index, step).await {
            self.run_step(iterator, visit, step).await?;
        }

        self.engine
            .run_hooks(HookPhase::AfterEach, &script.hooks.after_each, &self.data)
            .await
    }
}

#[async_trait]
impl<'a> RecoveryExecutor for StepVisitor<'a> {
    async fn run_recovery_step(&mut self, step: &Step, label: &str) -> anyhow::Result<()> {
        self.engine.sub_title = Some(label.to_string());
        self.engine
            .reporter
            .info(&format!("{label}: running '{}'", step.name));
        let info = StepInfo::new(&step.name, label);
        self.engine.set_current_step(&info);
        self.engine
            .observers
            .before_step(&self.engine.test_info(), &info)
            .await;

        let data = self.data.clone();
        let outcome = match self
            .engine
            .race_body(&step.action, &step.options.settings, label, &data)
            .await
        {
            Some(Ok(())) => {
                self.engine
                    .observers
                    .on_step_passed(&self.engine.test_info(), &info)
                    .await;
                Ok(())
            }
            Some(Err(e)) => {
                let error = classify(e);
                self.engine
                    .observers
                    .on_step_error(&self.engine.test_info(), &info, &error)
                    .await;
                Err(anyhow::Error::new(error))
            }
            None => Err(anyhow::anyhow!("recovery cancelled")),
        };

        self.engine
            .observers
            .after_step(&self.engine.test_info(), &info)
            .await;
        self.engine.target.set_current_step(None);
        outcome
    }

    fn is_cancelled(&self) -> bool {
        self.engine.cancel.is_cancellation_requested()
    }
}
