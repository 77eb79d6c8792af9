//! Audit error types

use thiserror::Error;

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Audit-related errors
#[derive(Error, Debug)]
pub enum AuditError {
    /// Query parameters are inconsistent
    #[error("Invalid audit query: {0}")]
    InvalidQuery(String),

    /// Backend failed to persist or read events
    #[error("Audit storage error: {0}")]
    Storage(String),

    /// Event payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
