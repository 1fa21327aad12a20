//! Failure classification
//!
//! Every failure raised by a step body is normalized exactly once, where the
//! engine first observes it, into a [`StructuredError`].

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Tag attached to a normalized failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An assertion in the step body did not hold
    Assertion,
    /// Catch-all for failures that carried no structure of their own
    Empty,
    /// Domain-specific tag chosen by whoever raised the error
    Domain(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Assertion => write!(f, "assertion"),
            ErrorKind::Empty => write!(f, "empty"),
            ErrorKind::Domain(tag) => write!(f, "{tag}"),
        }
    }
}

/// Normalized, immutable representation of a raised failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StructuredError {
    message: String,
    kind: ErrorKind,
    phase: Option<String>,
    call_site: Option<String>,
    original: Option<Arc<anyhow::Error>>,
}

impl StructuredError {
    /// Create a structured error, recording the caller as the call site
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            phase: None,
            call_site: Some(Location::caller().to_string()),
            original: None,
        }
    }

    /// Structured error with a domain-specific tag
    #[track_caller]
    pub fn domain(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Domain(tag.into()), message)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Phase the failure originated in, when known (`"test"` for wrapped failures)
    pub fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    pub fn call_site(&self) -> Option<&str> {
        self.call_site.as_deref()
    }

    /// The failure this error was built from, if it was wrapped
    pub fn original(&self) -> Option<&anyhow::Error> {
        self.original.as_deref()
    }

    pub fn is_assertion(&self) -> bool {
        self.kind == ErrorKind::Assertion
    }

    /// Human-readable form including the call site when available
    pub fn render(&self) -> String {
        match &self.call_site {
            Some(site) => format!("{}\n    at {}", self.message, site),
            None => self.message.clone(),
        }
    }
}

/// Failed assertion raised from a step body
#[derive(Debug, Clone, thiserror::Error)]
#[error("AssertionError: {message}")]
pub struct AssertionError {
    message: String,
    location: &'static Location<'static>,
}

impl AssertionError {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: Location::caller(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

/// Fail with an [`AssertionError`] unless `condition` holds
#[track_caller]
pub fn ensure(condition: bool, message: impl Into<String>) -> anyhow::Result<()> {
    if condition {
        Ok(())
    } else {
        Err(AssertionError::new(message).into())
    }
}

/// Normalize an arbitrary failure
pub fn classify(error: anyhow::Error) -> StructuredError {
    if let Some(assertion) = error.downcast_ref::<AssertionError>() {
        return StructuredError {
            message: assertion.to_string(),
            kind: ErrorKind::Assertion,
            phase: Some("test".to_string()),
            call_site: Some(assertion.location().to_string()),
            original: None,
        };
    }

    if let Some(structured) = error.downcast_ref::<StructuredError>() {
        return structured.clone();
    }

    let message = format!("{error:#}");
    let kind = if message.starts_with("AssertionError") {
        ErrorKind::Assertion
    } else {
        ErrorKind::Empty
    };

    StructuredError {
        message,
        kind,
        phase: Some("test".to_string()),
        call_site: None,
        original: Some(Arc::new(error)),
    }
}
