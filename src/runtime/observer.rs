//! Lifecycle observers
//!
//! Observers are listeners registered in an ordered [`ObserverChain`]. The
//! engine notifies the chain, and the chain notifies every listener exactly
//! once, in registration order. A typical chain is:
//!
//! ```text
//! ErrorObserver -> LifecycleObserver -> custom observers -> TimingObserver -> TraceObserver
//! ```
//!
//! For one step the notifications always arrive as
//! `before_step -> before_step_action* / after_step_action* -> (on_step_passed | on_step_error) -> after_step`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::classify::{ErrorKind, StructuredError};
use super::reporter::Reporter;

/// Snapshot of the running iteration handed to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    pub name: String,
    pub iteration: u32,
    pub failed: bool,
}

/// Step being notified about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInfo {
    /// Step identity
    pub name: String,
    /// Display label, e.g. `search (2/3)` or `login (1st recovery)`
    pub label: String,
}

impl StepInfo {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }
}

/// Capability every lifecycle listener implements; all methods default to no-ops
#[async_trait]
pub trait Observer: Send + Sync {
    async fn before(&self, _test: &TestInfo) {}

    async fn before_step(&self, _test: &TestInfo, _step: &StepInfo) {}

    async fn before_step_action(&self, _test: &TestInfo, _step: &StepInfo, _action: &str) {}

    async fn after_step_action(&self, _test: &TestInfo, _step: &StepInfo, _action: &str) {}

    async fn after_step(&self, _test: &TestInfo, _step: &StepInfo) {}

    async fn on_step_passed(&self, _test: &TestInfo, _step: &StepInfo) {}

    async fn on_step_error(&self, _test: &TestInfo, _step: &StepInfo, _error: &StructuredError) {}

    async fn after(&self, _test: &TestInfo) {}
}

/// Inert observer
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Builds a caller-supplied observer once the reporter is known
pub type ObserverFactory = Box<dyn FnOnce(Arc<dyn Reporter>) -> Arc<dyn Observer> + Send>;

/// Ordered list of observers
#[derive(Clone, Default)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn Observer>>,
}

impl std::fmt::Debug for ObserverChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverChain")
            .field("len", &self.observers.len())
            .finish()
    }
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error classification reporting followed by lifecycle logging
    pub fn standard(reporter: Arc<dyn Reporter>) -> Self {
        Self::new()
            .with(Arc::new(ErrorObserver::new(reporter.clone())))
            .with(Arc::new(LifecycleObserver::new(reporter)))
    }

    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.push(observer);
        self
    }

    /// Append the observer produced by `factory`
    pub fn with_factory(self, reporter: Arc<dyn Reporter>, factory: ObserverFactory) -> Self {
        self.with(factory(reporter))
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[async_trait]
impl Observer for ObserverChain {
    async fn before(&self, test: &TestInfo) {
        for observer in &self.observers {
            observer.before(test).await;
        }
    }

    async fn before_step(&self, test: &TestInfo, step: &StepInfo) {
        for observer in &self.observers {
            observer.before_step(test, step).await;
        }
    }

    async fn before_step_action(&self, test: &TestInfo, step: &StepInfo, action: &str) {
        for observer in &self.observers {
            observer.before_step_action(test, step, action).await;
        }
    }

    async fn after_step_action(&self, test: &TestInfo, step: &StepInfo, action: &str) {
        for observer in &self.observers {
            observer.after_step_action(test, step, action).await;
        }
    }

    async fn after_step(&self, test: &TestInfo, step: &StepInfo) {
        for observer in &self.observers {
            observer.after_step(test, step).await;
        }
    }

    async fn on_step_passed(&self, test: &TestInfo, step: &StepInfo) {
        for observer in &self.observers {
            observer.on_step_passed(test, step).await;
        }
    }

    async fn on_step_error(&self, test: &TestInfo, step: &StepInfo, error: &StructuredError) {
        for observer in &self.observers {
            observer.on_step_error(test, step, error).await;
        }
    }

    async fn after(&self, test: &TestInfo) {
        for observer in &self.observers {
            observer.after(test).await;
        }
    }
}

/// Routes step failures to the reporter by classification
pub struct ErrorObserver {
    reporter: Arc<dyn Reporter>,
}

impl ErrorObserver {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl Observer for ErrorObserver {
    async fn on_step_error(&self, _test: &TestInfo, step: &StepInfo, error: &StructuredError) {
        match error.kind() {
            ErrorKind::Assertion => self.reporter.test_assertion_error(error),
            ErrorKind::Domain(_) => self.reporter.test_step_error(error),
            ErrorKind::Empty => self
                .reporter
                .test_internal_error(&format!("Step '{}' failed", step.label), error),
        }
    }
}

/// Brackets iterations and steps with reporter log lines
pub struct LifecycleObserver {
    reporter: Arc<dyn Reporter>,
}

impl LifecycleObserver {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl Observer for LifecycleObserver {
    async fn before(&self, test: &TestInfo) {
        self.reporter
            .info(&format!("{}: iteration {} started", test.name, test.iteration));
    }

    async fn before_step(&self, _test: &TestInfo, step: &StepInfo) {
        self.reporter.debug(&format!("Step '{}' started", step.label));
    }

    async fn on_step_passed(&self, _test: &TestInfo, step: &StepInfo) {
        self.reporter.info(&format!("Step '{}' passed", step.label));
    }

    async fn on_step_error(&self, _test: &TestInfo, step: &StepInfo, error: &StructuredError) {
        self.reporter
            .warn(&format!("Step '{}' failed: {}", step.label, error.message()));
    }

    async fn after_step(&self, _test: &TestInfo, step: &StepInfo) {
        self.reporter.debug(&format!("Step '{}' finished", step.label));
    }

    async fn after(&self, test: &TestInfo) {
        let outcome = if test.failed { "failed" } else { "passed" };
        self.reporter.info(&format!(
            "{}: iteration {} {}",
            test.name, test.iteration, outcome
        ));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Duration of one step and of the actions it performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTiming {
    pub step: String,
    pub elapsed: Duration,
    pub actions: Vec<(String, Duration)>,
}

#[derive(Default)]
struct TimingState {
    step_started: Option<Instant>,
    action_started: HashMap<String, Instant>,
    actions: Vec<(String, Duration)>,
    timings: Vec<StepTiming>,
}

/// Captures step and action durations for the current iteration
#[derive(Default)]
pub struct TimingObserver {
    state: Mutex<TimingState>,
}

impl TimingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timings recorded during the current (or last) iteration
    pub fn timings(&self) -> Vec<StepTiming> {
        lock(&self.state).timings.clone()
    }
}

#[async_trait]
impl Observer for TimingObserver {
    async fn before(&self, _test: &TestInfo) {
        *lock(&self.state) = TimingState::default();
    }

    async fn before_step(&self, _test: &TestInfo, _step: &StepInfo) {
        let mut state = lock(&self.state);
        state.step_started = Some(Instant::now());
        state.actions.clear();
    }

    async fn before_step_action(&self, _test: &TestInfo, _step: &StepInfo, action: &str) {
        lock(&self.state)
            .action_started
            .insert(action.to_string(), Instant::now());
    }

    async fn after_step_action(&self, _test: &TestInfo, _step: &StepInfo, action: &str) {
        let mut state = lock(&self.state);
        if let Some(started) = state.action_started.remove(action) {
            state.actions.push((action.to_string(), started.elapsed()));
        }
    }

    async fn after_step(&self, _test: &TestInfo, step: &StepInfo) {
        let mut state = lock(&self.state);
        let Some(started) = state.step_started.take() else {
            return;
        };
        let actions = std::mem::take(&mut state.actions);
        state.timings.push(StepTiming {
            step: step.label.clone(),
            elapsed: started.elapsed(),
            actions,
        });
    }
}

/// One recorded notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Before { iteration: u32 },
    BeforeStep { step: String },
    BeforeAction { step: String, action: String },
    AfterAction { step: String, action: String },
    Passed { step: String },
    Error { step: String, kind: ErrorKind },
    AfterStep { step: String },
    After { iteration: u32, failed: bool },
}

/// Records every notification in order, correlating actions with their step
#[derive(Default)]
pub struct TraceObserver {
    events: Mutex<Vec<TraceEvent>>,
}

impl TraceObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        lock(&self.events).clone()
    }

    /// Actions performed while `step` (by label) was current
    pub fn actions_for(&self, step: &str) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                TraceEvent::BeforeAction { step: s, action } if s == step => Some(action.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn record(&self, event: TraceEvent) {
        lock(&self.events).push(event);
    }
}

#[async_trait]
impl Observer for TraceObserver {
    async fn before(&self, test: &TestInfo) {
        self.record(TraceEvent::Before {
            iteration: test.iteration,
        });
    }

    async fn before_step(&self, _test: &TestInfo, step: &StepInfo) {
        self.record(TraceEvent::BeforeStep {
            step: step.label.clone(),
        });
    }

    async fn before_step_action(&self, _test: &TestInfo, step: &StepInfo, action: &str) {
        self.record(TraceEvent::BeforeAction {
            step: step.label.clone(),
            action: action.to_string(),
        });
    }

    async fn after_step_action(&self, _test: &TestInfo, step: &StepInfo, action: &str) {
        self.record(TraceEvent::AfterAction {
            step: step.label.clone(),
            action: action.to_string(),
        });
    }

    async fn after_step(&self, _test: &TestInfo, step: &StepInfo) {
        self.record(TraceEvent::AfterStep {
            step: step.label.clone(),
        });
    }

    async fn on_step_passed(&self, _test: &TestInfo, step: &StepInfo) {
        self.record(TraceEvent::Passed {
            step: step.label.clone(),
        });
    }

    async fn on_step_error(&self, _test: &TestInfo, step: &StepInfo, error: &StructuredError) {
        self.record(TraceEvent::Error {
            step: step.label.clone(),
            kind: error.kind().clone(),
        });
    }

    async fn after(&self, test: &TestInfo) {
        self.record(TraceEvent::After {
            iteration: test.iteration,
            failed: test.failed,
        });
    }
}
