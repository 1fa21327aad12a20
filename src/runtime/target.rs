//! Execution target contract
//!
//! The target is the external driver that physically performs actions (a
//! browser, a device, a shell). The engine only needs to read and replace its
//! settings, apply one-shot iteration directives and tell it which step is
//! current, so that the target can announce the actions it performs.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::observer::{Observer, StepInfo, TestInfo};
use super::settings::ConcreteSettings;

/// Execution target driven by step bodies
#[async_trait]
pub trait ExecutionTarget: Send + Sync {
    /// Settings currently in effect
    fn settings(&self) -> ConcreteSettings;

    /// Replace the settings in effect
    fn apply_settings(&self, settings: ConcreteSettings);

    /// Set (or clear) the step the target should attribute its actions to
    fn set_current_step(&self, step: Option<CurrentStep>);

    async fn clear_cache(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn clear_cookies(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn emulate_device(&self, _device: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_user_agent(&self, _user_agent: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_cache_disabled(&self, _disabled: bool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_extra_headers(&self, _headers: &BTreeMap<String, String>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The "current step" slot handed to the target before a step body runs
#[derive(Clone)]
pub struct CurrentStep {
    step: StepInfo,
    test: TestInfo,
    observer: Arc<dyn Observer>,
}

impl fmt::Debug for CurrentStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentStep")
            .field("step", &self.step)
            .field("test", &self.test)
            .finish_non_exhaustive()
    }
}

impl CurrentStep {
    pub fn new(step: StepInfo, test: TestInfo, observer: Arc<dyn Observer>) -> Self {
        Self {
            step,
            test,
            observer,
        }
    }

    pub fn step(&self) -> &StepInfo {
        &self.step
    }

    /// Announce the start of an atomic action
    pub async fn before_action(&self, action: &str) {
        self.observer
            .before_step_action(&self.test, &self.step, action)
            .await;
    }

    /// Announce the end of an atomic action
    pub async fn after_action(&self, action: &str) {
        self.observer
            .after_step_action(&self.test, &self.step, action)
            .await;
    }

    /// Run `fut` bracketed by begin/end notifications
    pub async fn action<F>(&self, action: &str, fut: F) -> F::Output
    where
        F: Future,
    {
        self.before_action(action).await;
        let output = fut.await;
        self.after_action(action).await;
        output
    }
}

/// Network interception collaborator attached for the duration of an iteration
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn attach(&self, target: &dyn ExecutionTarget) -> anyhow::Result<()>;

    async fn detach(&self, target: &dyn ExecutionTarget) -> anyhow::Result<()>;
}

/// Interceptor that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInterceptor;

#[async_trait]
impl Interceptor for NoopInterceptor {
    async fn attach(&self, _target: &dyn ExecutionTarget) -> anyhow::Result<()> {
        Ok(())
    }

    async fn detach(&self, _target: &dyn ExecutionTarget) -> anyhow::Result<()> {
        Ok(())
    }
}
