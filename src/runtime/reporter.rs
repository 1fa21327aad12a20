//! Reporter contract
//!
//! Terminal failure events plus a console-style logging passthrough. The
//! engine never prints; everything user-facing goes through a reporter.

use std::fmt;

use super::classify::StructuredError;

/// Console passthrough levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
    Log,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Log => write!(f, "log"),
        }
    }
}

/// Receives terminal failures and log lines
pub trait Reporter: Send + Sync {
    /// A failure that is not the script's fault (hook, target or engine problem)
    fn test_internal_error(&self, message: &str, error: &(dyn std::error::Error + 'static));

    /// A step failed an assertion
    fn test_assertion_error(&self, error: &StructuredError);

    /// A step failed with a structured, domain-tagged error
    fn test_step_error(&self, error: &StructuredError);

    fn log(&self, level: LogLevel, message: &str);

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards everything to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn test_internal_error(&self, message: &str, error: &(dyn std::error::Error + 'static)) {
        tracing::error!(error = %error, "{}", message);
    }

    fn test_assertion_error(&self, error: &StructuredError) {
        tracing::error!(
            kind = %error.kind(),
            call_site = error.call_site().unwrap_or("unknown"),
            "{}",
            error.message()
        );
    }

    fn test_step_error(&self, error: &StructuredError) {
        tracing::error!(kind = %error.kind(), "{}", error.render());
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
            LogLevel::Info | LogLevel::Log => tracing::info!("{}", message),
        }
    }
}

/// Inert reporter
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn test_internal_error(&self, _message: &str, _error: &(dyn std::error::Error + 'static)) {}

    fn test_assertion_error(&self, _error: &StructuredError) {}

    fn test_step_error(&self, _error: &StructuredError) {}

    fn log(&self, _level: LogLevel, _message: &str) {}
}
