//! Iteration looping bounded by count and/or wall-clock duration

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::settings::ConcreteSettings;

/// One iteration body, invoked with the 1-based iteration number
#[async_trait]
pub trait Iterate: Send {
    async fn iterate(&mut self, iteration: u32);
}

#[async_trait]
impl<F, Fut> Iterate for F
where
    F: FnMut(u32) -> Fut + Send,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn iterate(&mut self, iteration: u32) {
        self(iteration).await
    }
}

/// Cloneable stop switch for a [`Looper`]
#[derive(Debug, Clone, Default)]
pub struct LooperHandle {
    stopped: Arc<AtomicBool>,
}

impl LooperHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prevent any further iteration from starting. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Looper stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Runs iterations strictly one after another until a bound is hit
#[derive(Debug)]
pub struct Looper {
    loop_count: i64,
    duration: Option<Duration>,
    deadline: Option<Instant>,
    iterations: u32,
    handle: LooperHandle,
}

impl Looper {
    /// `loop_count <= 0` means unbounded; a `running` flag of false stops the looper up front
    pub fn new(loop_count: i64, duration: Option<Duration>, running: bool) -> Self {
        let handle = LooperHandle::new();
        if !running {
            handle.stop();
        }
        Self {
            loop_count,
            duration,
            deadline: None,
            iterations: 0,
            handle,
        }
    }

    pub fn from_settings(settings: &ConcreteSettings, running: bool) -> Self {
        Self::new(settings.loop_count, settings.duration, running)
    }

    /// Share an externally created stop switch
    pub fn with_handle(mut self, handle: LooperHandle) -> Self {
        if self.handle.is_stopped() {
            handle.stop();
        }
        self.handle = handle;
        self
    }

    pub fn handle(&self) -> LooperHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Whether another iteration may start
    pub fn continue_loop(&self) -> bool {
        if self.handle.is_stopped() {
            return false;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return false;
            }
        }
        self.loop_count <= 0 || i64::from(self.iterations) < self.loop_count
    }

    /// Run `iterator` until a bound is reached; returns the number of iterations run
    pub async fn run<I>(&mut self, iterator: &mut I) -> u32
    where
        I: Iterate + ?Sized,
    {
        self.deadline = self
            .duration
            .and_then(|duration| Instant::now().checked_add(duration));

        while self.continue_loop() {
            self.iterations += 1;
            tracing::debug!(iteration = self.iterations, "Starting iteration");
            iterator.iterate(self.iterations).await;
            // Unbounded loops over bodies that never suspend must still let
            // other tasks (stop requests, timers) make progress.
            tokio::task::yield_now().await;
        }

        self.deadline = None;
        tracing::debug!(iterations = self.iterations, "Looper finished");
        self.iterations
    }
}
