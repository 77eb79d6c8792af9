//! Audit event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Execution lifecycle
    ExecutionStarted,
    StateTransition,
    ExecutionCompleted,
    ExecutionFailed,

    // Template administration
    TemplateCreated,
    TemplateVersionPublished,
    TemplateDeactivated,

    // Scheduling
    ScheduleCreated,
    ScheduleEnabled,
    ScheduleDisabled,
    ScheduleFired,
    ScheduleFireFailed,

    // Batch processing
    BatchCreated,
    BatchCompleted,
    BatchCancelled,

    // Maintenance
    RetentionCleanup,
}

impl AuditEventType {
    /// Get the severity level of this event type
    pub fn severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::ExecutionFailed | AuditEventType::ScheduleFireFailed => {
                AuditSeverity::High
            }

            AuditEventType::TemplateDeactivated
            | AuditEventType::BatchCancelled
            | AuditEventType::RetentionCleanup => AuditSeverity::Medium,

            AuditEventType::TemplateCreated
            | AuditEventType::TemplateVersionPublished
            | AuditEventType::ScheduleCreated
            | AuditEventType::ScheduleEnabled
            | AuditEventType::ScheduleDisabled
            | AuditEventType::BatchCreated => AuditSeverity::Low,

            AuditEventType::ExecutionStarted
            | AuditEventType::StateTransition
            | AuditEventType::ExecutionCompleted
            | AuditEventType::ScheduleFired
            | AuditEventType::BatchCompleted => AuditSeverity::Info,
        }
    }

    /// Whether this event records a workflow state transition
    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            AuditEventType::StateTransition
                | AuditEventType::ExecutionCompleted
                | AuditEventType::ExecutionFailed
        )
    }

    /// Get as string
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::ExecutionStarted => "execution_started",
            AuditEventType::StateTransition => "state_transition",
            AuditEventType::ExecutionCompleted => "execution_completed",
            AuditEventType::ExecutionFailed => "execution_failed",
            AuditEventType::TemplateCreated => "template_created",
            AuditEventType::TemplateVersionPublished => "template_version_published",
            AuditEventType::TemplateDeactivated => "template_deactivated",
            AuditEventType::ScheduleCreated => "schedule_created",
            AuditEventType::ScheduleEnabled => "schedule_enabled",
            AuditEventType::ScheduleDisabled => "schedule_disabled",
            AuditEventType::ScheduleFired => "schedule_fired",
            AuditEventType::ScheduleFireFailed => "schedule_fire_failed",
            AuditEventType::BatchCreated => "batch_created",
            AuditEventType::BatchCompleted => "batch_completed",
            AuditEventType::BatchCancelled => "batch_cancelled",
            AuditEventType::RetentionCleanup => "retention_cleanup",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSeverity::Info => "info",
            AuditSeverity::Low => "low",
            AuditSeverity::Medium => "medium",
            AuditSeverity::High => "high",
            AuditSeverity::Critical => "critical",
        }
    }
}

/// Immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,
    /// Workflow (template) the event belongs to
    pub workflow_id: Option<String>,
    /// Execution the event belongs to
    pub execution_id: Option<String>,
    /// Event type
    pub event_type: AuditEventType,
    /// Severity level
    pub severity: AuditSeverity,
    /// Event payload
    pub payload: serde_json::Value,
    /// Actor (user ID or system component)
    pub actor_id: Option<String>,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Compliance tags inherited from the template
    pub compliance_tags: BTreeSet<String>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: None,
            execution_id: None,
            event_type,
            severity: event_type.severity(),
            payload: serde_json::Value::Null,
            actor_id: None,
            timestamp: Utc::now(),
            compliance_tags: BTreeSet::new(),
        }
    }

    pub fn with_workflow(mut self, workflow_id: &str) -> Self {
        self.workflow_id = Some(workflow_id.to_string());
        self
    }

    pub fn with_execution(mut self, execution_id: &str) -> Self {
        self.execution_id = Some(execution_id.to_string());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_actor(mut self, actor_id: Option<&str>) -> Self {
        self.actor_id = actor_id.map(str::to_string);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compliance_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Override the timestamp (imports and backfills)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Convert to JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_creation() {
        let event = AuditEvent::new(AuditEventType::StateTransition)
            .with_workflow("standard_review")
            .with_execution("exec-1")
            .with_actor(Some("user-123"))
            .with_tags(["gdpr", "sox"])
            .with_payload(serde_json::json!({"from": "analyzing", "to": "negotiating"}));

        assert_eq!(event.event_type, AuditEventType::StateTransition);
        assert_eq!(event.severity, AuditSeverity::Info);
        assert_eq!(event.workflow_id.as_deref(), Some("standard_review"));
        assert_eq!(event.actor_id.as_deref(), Some("user-123"));
        assert!(event.compliance_tags.contains("gdpr"));
        assert_eq!(event.payload["to"], "negotiating");
    }

    #[test]
    fn test_transition_types() {
        assert!(AuditEventType::StateTransition.is_transition());
        assert!(AuditEventType::ExecutionFailed.is_transition());
        assert!(!AuditEventType::ExecutionStarted.is_transition());
        assert!(!AuditEventType::ScheduleFired.is_transition());
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_value(AuditEventType::ScheduleFireFailed).unwrap();
        assert_eq!(json, "schedule_fire_failed");
        assert_eq!(AuditEventType::ScheduleFireFailed.as_str(), "schedule_fire_failed");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AuditSeverity::Info < AuditSeverity::Low);
        assert!(AuditSeverity::Low < AuditSeverity::Medium);
        assert!(AuditSeverity::Medium < AuditSeverity::High);
        assert!(AuditSeverity::High < AuditSeverity::Critical);
    }
}
