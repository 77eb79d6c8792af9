//! Step failure classification
//!
//! The engine never inspects error text directly: every failure passes through
//! [`ErrorClassifier`] and the router consumes the resulting [`ErrorKind`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy for step and execution failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or configuration
    Validation,
    /// Timeout, rate limit, connection drop or transient provider failure
    TransientExecution,
    /// Step output failed structural validation
    Schema,
    /// Execution budget exhausted
    Timeout,
    /// Missing or invalid template or schedule data
    Configuration,
}

impl ErrorKind {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientExecution)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TransientExecution => "transient_execution",
            ErrorKind::Schema => "schema",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure reported by a step executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub message: String,
    /// Executors that know the cause may classify it themselves
    pub kind: Option<ErrorKind>,
}

impl StepFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(ErrorKind::TransientExecution),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(ErrorKind::Validation),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StepFailure {}

/// A failure with a typed retryability verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error in {step}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    /// Step ID, or the phase name for engine-level failures
    pub step: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step: step.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

static TRANSIENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)time[sd]?\s*-?out",
        r"(?i)deadline exceeded",
        r"(?i)rate[\s_-]*limit",
        r"(?i)too many requests",
        r"\b429\b",
        r"(?i)connection (reset|refused|closed|aborted|error)",
        r"(?i)\bconnect(ion)?\b.*\bfailed\b",
        r"(?i)temporar(y|ily) unavailable",
        r"(?i)service unavailable",
        r"\b50[234]\b",
        r"(?i)overloaded",
        r"(?i)\btransient\b",
        r"(?i)try again",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static PERMANENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)validation",
        r"(?i)\binvalid\b",
        r"(?i)malformed",
        r"(?i)unauthori[sz]ed",
        r"(?i)forbidden",
        r"(?i)authentication",
        r"(?i)not found",
        r"\b40[0134]\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Maps raw step failures onto the error taxonomy
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a message; permanent causes win over transient ones
    pub fn classify_message(&self, message: &str) -> ErrorKind {
        if PERMANENT_PATTERNS.iter().any(|re| re.is_match(message)) {
            return ErrorKind::Validation;
        }
        if TRANSIENT_PATTERNS.iter().any(|re| re.is_match(message)) {
            return ErrorKind::TransientExecution;
        }
        // Unknown causes are not retried
        ErrorKind::Validation
    }

    pub fn classify(&self, step: &str, failure: StepFailure) -> ClassifiedError {
        let kind = failure
            .kind
            .unwrap_or_else(|| self.classify_message(&failure.message));
        ClassifiedError::new(kind, step, failure.message)
    }
}
