//! # Redline Audit
//!
//! Append-only audit trail for workflow executions and administrative actions.
//!
//! This crate provides:
//! - The audit event model with derived severities
//! - Queryable and tracing-backed audit logger backends
//! - Compliance report aggregation over a time range
//! - Retention cleanup, the only path that removes events

pub mod compliance;
pub mod error;
pub mod event;
pub mod logger;

pub use compliance::{cleanup_expired, generate_report, ComplianceReport, ReportRange};
pub use error::{AuditError, Result};
pub use event::{AuditEvent, AuditEventType, AuditSeverity};
pub use logger::{
    AuditFilter, AuditLogger, CompositeAuditLogger, InMemoryAuditLogger, TracingAuditLogger,
};
