//! Scenario execution runtime
//!
//! Leaves first: cancellation, looping, step traversal, observation and error
//! classification, composed by the [`TestEngine`] and driven by the [`Runner`].

pub mod cancel;
pub mod classify;
pub mod data;
pub mod engine;
pub mod iterator;
pub mod looper;
pub mod observer;
pub mod reporter;
pub mod runner;
pub mod settings;
pub mod step;
pub mod summary;
pub mod target;

pub use cancel::CancellationToken;
pub use classify::{classify, ensure, AssertionError, ErrorKind, StructuredError};
pub use data::{DataFeeder, TestData};
pub use engine::TestEngine;
pub use iterator::{ordinal, StepIterator};
pub use looper::{Looper, LooperHandle};
pub use observer::{
    ErrorObserver, LifecycleObserver, NullObserver, Observer, ObserverChain, ObserverFactory,
    StepInfo, TestInfo, TimingObserver, TraceEvent, TraceObserver,
};
pub use reporter::{LogLevel, NullReporter, Reporter, TracingReporter};
pub use runner::{IterationOutcome, RunReport, Runner, RunnerHandle};
pub use settings::{ConcreteSettings, TestSettings};
pub use step::{
    Action, Condition, Hook, HookPhase, Hooks, Predicate, RecoverySequence, Script, Step,
    StepContext, StepOptions,
};
pub use summary::{StepResult, Summary, SummaryStep};
pub use target::{CurrentStep, ExecutionTarget, Interceptor, NoopInterceptor};
