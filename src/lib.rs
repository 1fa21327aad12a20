//! Scenario CLI - scripted multi-step test scenarios
//!
//! This library runs scripts of named steps against an execution target,
//! repeating them across iterations bounded by count and duration, with
//! lifecycle hooks, conditional gating, failure recovery, cooperative
//! cancellation and pluggable lifecycle observers.

pub mod cli;
pub mod commands;
pub mod common;
pub mod runtime;
pub mod script;
pub mod target;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use runtime::{
    CancellationToken, Hook, HookPhase, ObserverChain, RecoverySequence, RunReport, Runner,
    Script, Step, StepResult, SummaryStep, TestEngine, TestSettings,
};
