//! Error types for the scenario runner
//!
//! Iteration-level failures carry enough context (phase, step name, timeout)
//! for the runner to log them without re-deriving where they came from.

use std::io;
use thiserror::Error;

use crate::runtime::classify::StructuredError;
use crate::runtime::step::HookPhase;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scenario runner
#[derive(Error, Debug)]
pub enum Error {
    // === Iteration Errors ===
    #[error("Test data exhausted, consider making the data feeder circular")]
    DataExhausted,

    #[error("{phase} hook timed out after {timeout_secs} seconds")]
    HookTimeout { phase: HookPhase, timeout_secs: f64 },

    #[error("{phase} hook failed: {source}")]
    Hook {
        phase: HookPhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("Step '{step}' failed and could not be recovered: {error}")]
    StepFailed { step: String, error: StructuredError },

    #[error("Iteration cancelled")]
    Cancelled,

    #[error("Execution target error: {0}")]
    Target(#[source] anyhow::Error),

    #[error("{failed} of {total} iterations failed")]
    RunFailed { failed: usize, total: u32 },

    // === Script Errors ===
    #[error("No script enqueued. Call enqueue_script before running")]
    NoScript,

    #[error("Duplicate step name '{0}'. Step names must be unique within a script")]
    DuplicateStep(String),

    #[error("Recovery registered for unknown step '{0}'")]
    UnknownRecoveryStep(String),

    #[error("Invalid scenario file: {0}")]
    ScriptParse(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a hook failure error
    pub fn hook(phase: HookPhase, source: anyhow::Error) -> Self {
        Self::Hook { phase, source }
    }

    /// Create an unrecoverable step failure error
    pub fn step_failed(step: &str, error: StructuredError) -> Self {
        Self::StepFailed {
            step: step.to_string(),
            error,
        }
    }

    /// Whether this error ended the iteration because of a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Short machine-friendly code, used in run reports and logs
    pub fn code(&self) -> &'static str {
        match self {
            Error::DataExhausted => "DATA_EXHAUSTED",
            Error::HookTimeout { .. } => "HOOK_TIMEOUT",
            Error::Hook { .. } => "HOOK_ERROR",
            Error::StepFailed { .. } => "STEP_FAILED",
            Error::Cancelled => "CANCELLED",
            Error::Target(_) => "TARGET_ERROR",
            Error::RunFailed { .. } => "RUN_FAILED",
            Error::NoScript | Error::DuplicateStep(_) | Error::UnknownRecoveryStep(_) => {
                "INVALID_SCRIPT"
            }
            Error::ScriptParse(_) | Error::Config(_) | Error::ConfigParse(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::DataExhausted.code(), "DATA_EXHAUSTED");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
        assert_eq!(
            Error::DuplicateStep("login".to_string()).code(),
            "INVALID_SCRIPT"
        );
        assert_eq!(Error::Internal("boom".to_string()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_hook_timeout_message() {
        let err = Error::HookTimeout {
            phase: HookPhase::BeforeAll,
            timeout_secs: 1.0,
        };
        assert_eq!(err.to_string(), "before_all hook timed out after 1 seconds");
        assert!(!err.is_cancelled());
        assert!(Error::Cancelled.is_cancelled());
    }
}
