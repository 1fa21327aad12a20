//! Script definition types
//!
//! A [`Script`] is built by the caller before the engine runs and is never
//! mutated by it. Step bodies, hooks and predicates are shared closures that
//! return boxed futures, so the same definition can be run on every
//! iteration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::common::{Error, Result};

use super::cancel::CancellationToken;
use super::data::{DataFeeder, TestData};
use super::settings::TestSettings;
use super::target::ExecutionTarget;

/// Everything a step body or hook gets to work with
#[derive(Clone)]
pub struct StepContext {
    /// The execution target driving the physical actions
    pub target: Arc<dyn ExecutionTarget>,
    /// Data record fed for this iteration
    pub data: Arc<Value>,
    /// 1-based iteration number
    pub iteration: u32,
    /// Step label, or the hook phase for hooks
    pub label: String,
    /// Bodies that want to stop early can watch this
    pub cancel: CancellationToken,
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("data", &self.data)
            .field("iteration", &self.iteration)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

type ActionFn = Arc<dyn Fn(StepContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type PredicateFn =
    Arc<dyn Fn(Arc<dyn ExecutionTarget>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// Shareable async action (a step body or a hook function)
#[derive(Clone)]
pub struct Action(ActionFn);

impl Action {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |ctx| f(ctx).boxed()))
    }

    /// Start the action; the returned future owns everything it needs
    pub fn call(&self, ctx: StepContext) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.0)(ctx)
    }
}

/// Runtime predicate evaluated against the execution target
#[derive(Clone)]
pub struct Predicate(PredicateFn);

impl Predicate {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn ExecutionTarget>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self(Arc::new(move |target| f(target).boxed()))
    }

    /// Predicate with a fixed answer
    pub fn constant(value: bool) -> Self {
        Self::new(move |_| async move { Ok(value) })
    }

    pub async fn evaluate(&self, target: Arc<dyn ExecutionTarget>) -> anyhow::Result<bool> {
        (self.0)(target).await
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Conditional gate; an excluding condition records the step as skipped
#[derive(Debug, Clone)]
pub enum Condition {
    /// Run only when the predicate holds
    If(Predicate),
    /// Run only when the predicate does not hold
    Unless(Predicate),
}

impl Condition {
    /// Whether the step should run
    pub async fn admits(&self, target: Arc<dyn ExecutionTarget>) -> anyhow::Result<bool> {
        match self {
            Condition::If(predicate) => predicate.evaluate(target).await,
            Condition::Unless(predicate) => Ok(!predicate.evaluate(target).await?),
        }
    }
}

/// Gating and override options for a step
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Never run; recorded as skipped
    pub skip: bool,
    /// Not written yet; recorded as unexecuted
    pub pending: bool,
    /// Run on the first iteration only
    pub once: bool,
    /// Planned repetitions per iteration
    pub repeat: Option<u32>,
    /// Silent gate: false bypasses the body without recording anything
    pub predicate: Option<Predicate>,
    pub condition: Option<Condition>,
    /// Settings in effect while the body runs
    pub settings: TestSettings,
}

/// One named unit of scripted action
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub action: Action,
    pub options: StepOptions,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Step {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Action::new(f),
            options: StepOptions::default(),
        }
    }

    pub fn skip(mut self) -> Self {
        self.options.skip = true;
        self
    }

    pub fn pending(mut self) -> Self {
        self.options.pending = true;
        self
    }

    pub fn once(mut self) -> Self {
        self.options.once = true;
        self
    }

    pub fn repeat(mut self, count: u32) -> Self {
        self.options.repeat = Some(count);
        self
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.options.predicate = Some(predicate);
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.options.condition = Some(condition);
        self
    }

    pub fn settings(mut self, settings: TestSettings) -> Self {
        self.options.settings = settings;
        self
    }
}

/// Lifecycle point a hook runs at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::BeforeAll => write!(f, "before_all"),
            HookPhase::AfterAll => write!(f, "after_all"),
            HookPhase::BeforeEach => write!(f, "before_each"),
            HookPhase::AfterEach => write!(f, "after_each"),
        }
    }
}

/// Timeout-bound lifecycle function
#[derive(Clone)]
pub struct Hook {
    pub action: Action,
    pub wait_timeout: Duration,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

impl Hook {
    pub fn new<F, Fut>(wait_timeout: Duration, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            action: Action::new(f),
            wait_timeout,
        }
    }
}

/// Hooks grouped by lifecycle point, each run in declaration order
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub before_all: Vec<Hook>,
    pub after_all: Vec<Hook>,
    pub before_each: Vec<Hook>,
    pub after_each: Vec<Hook>,
}

impl Hooks {
    pub fn get(&self, phase: HookPhase) -> &[Hook] {
        match phase {
            HookPhase::BeforeAll => &self.before_all,
            HookPhase::AfterAll => &self.after_all,
            HookPhase::BeforeEach => &self.before_each,
            HookPhase::AfterEach => &self.after_each,
        }
    }

    pub fn add(&mut self, phase: HookPhase, hook: Hook) {
        match phase {
            HookPhase::BeforeAll => self.before_all.push(hook),
            HookPhase::AfterAll => self.after_all.push(hook),
            HookPhase::BeforeEach => self.before_each.push(hook),
            HookPhase::AfterEach => self.after_each.push(hook),
        }
    }
}

/// Steps run when a named step fails
#[derive(Debug, Clone, Default)]
pub struct RecoverySequence {
    pub steps: Vec<Step>,
    /// Attempts before giving up; falls back to the `tries` setting
    pub tries: Option<u32>,
}

impl RecoverySequence {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, tries: None }
    }

    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = Some(tries);
        self
    }
}

/// Complete scripted scenario
#[derive(Clone)]
pub struct Script {
    pub settings: TestSettings,
    pub steps: Vec<Step>,
    /// Recovery sequences keyed by the failing step's name
    pub recovery: HashMap<String, RecoverySequence>,
    pub hooks: Hooks,
    pub data: Arc<dyn DataFeeder>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            settings: TestSettings::default(),
            steps: Vec::new(),
            recovery: HashMap::new(),
            hooks: Hooks::default(),
            data: Arc::new(TestData::default()),
        }
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("settings", &self.settings)
            .field("steps", &self.steps)
            .field("recovery", &self.recovery)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Script {
    pub fn new(settings: TestSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn recover(mut self, step_name: impl Into<String>, sequence: RecoverySequence) -> Self {
        self.recovery.insert(step_name.into(), sequence);
        self
    }

    pub fn hook(mut self, phase: HookPhase, hook: Hook) -> Self {
        self.hooks.add(phase, hook);
        self
    }

    pub fn data(mut self, data: impl DataFeeder + 'static) -> Self {
        self.data = Arc::new(data);
        self
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.name.clone()).collect()
    }

    /// Step names must be unique so recovery lookup is unambiguous
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(Error::DuplicateStep(step.name.clone()));
            }
        }
        if let Some(unknown) = self.recovery.keys().find(|name| !seen.contains(name.as_str())) {
            return Err(Error::UnknownRecoveryStep(unknown.clone()));
        }

        self.settings.validate()?;
        let recovery_steps = self.recovery.values().flat_map(|seq| seq.steps.iter());
        for step in self.steps.iter().chain(recovery_steps) {
            step.options.settings.validate()?;
        }
        Ok(())
    }
}
