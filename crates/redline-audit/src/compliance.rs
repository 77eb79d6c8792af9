//! Compliance reporting and retention cleanup

use crate::event::{AuditEvent, AuditEventType};
use crate::logger::{AuditFilter, AuditLogger};
use crate::{AuditError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Inclusive time range covered by a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(AuditError::InvalidQuery(
                "report range start is after its end".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// The trailing window ending now
    pub fn last_days(days: i64) -> Result<Self> {
        let end = Utc::now();
        let start = days_before(end, days)?;
        Self::new(start, end)
    }
}

/// `at` minus `days`, or an error when the result leaves chrono's range
fn days_before(at: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    Duration::try_days(days)
        .and_then(|delta| at.checked_sub_signed(delta))
        .ok_or_else(|| {
            AuditError::InvalidQuery(format!("{} days before {} is out of range", days, at))
        })
}

/// Aggregated audit counts for compliance review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub range: ReportRange,
    /// Tag filter applied, empty when the report covers every event
    pub tags: BTreeSet<String>,
    pub total_events: u64,
    pub by_event_type: BTreeMap<String, u64>,
    pub by_workflow: BTreeMap<String, u64>,
    pub by_actor: BTreeMap<String, u64>,
    pub by_tag: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub executions_started: u64,
    pub executions_completed: u64,
    pub executions_failed: u64,
}

impl ComplianceReport {
    fn empty(range: ReportRange, tags: BTreeSet<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            range,
            tags,
            total_events: 0,
            by_event_type: BTreeMap::new(),
            by_workflow: BTreeMap::new(),
            by_actor: BTreeMap::new(),
            by_tag: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            executions_started: 0,
            executions_completed: 0,
            executions_failed: 0,
        }
    }

    fn add(&mut self, event: &AuditEvent) {
        self.total_events += 1;
        *self
            .by_event_type
            .entry(event.event_type.as_str().to_string())
            .or_default() += 1;
        *self
            .by_severity
            .entry(event.severity.as_str().to_string())
            .or_default() += 1;

        let workflow = event.workflow_id.as_deref().unwrap_or("none");
        *self.by_workflow.entry(workflow.to_string()).or_default() += 1;

        let actor = event.actor_id.as_deref().unwrap_or("system");
        *self.by_actor.entry(actor.to_string()).or_default() += 1;

        for tag in &event.compliance_tags {
            *self.by_tag.entry(tag.clone()).or_default() += 1;
        }

        match event.event_type {
            AuditEventType::ExecutionStarted => self.executions_started += 1,
            AuditEventType::ExecutionCompleted => self.executions_completed += 1,
            AuditEventType::ExecutionFailed => self.executions_failed += 1,
            _ => {}
        }
    }

    /// Share of finished executions that failed
    pub fn failure_rate(&self) -> f64 {
        let finished = self.executions_completed + self.executions_failed;
        if finished == 0 {
            return 0.0;
        }
        self.executions_failed as f64 / finished as f64
    }
}

/// Aggregate every event in `range` matching any of `tags` (all events when empty)
pub async fn generate_report(
    logger: &dyn AuditLogger,
    range: ReportRange,
    tags: Option<BTreeSet<String>>,
) -> Result<ComplianceReport> {
    let tags = tags.unwrap_or_default();
    let filter = AuditFilter {
        start_time: Some(range.start),
        end_time: Some(range.end),
        compliance_tags: (!tags.is_empty()).then(|| tags.clone()),
        ..Default::default()
    };

    let events = logger.query(&filter, usize::MAX, 0).await?;
    let mut report = ComplianceReport::empty(range, tags);
    for event in &events {
        report.add(event);
    }

    info!(
        total_events = report.total_events,
        start = %range.start,
        end = %range.end,
        "Generated compliance report"
    );

    Ok(report)
}

/// Remove events strictly older than `now - retention_days`
///
/// Records a retention_cleanup event describing the sweep.
pub async fn cleanup_expired(
    logger: &dyn AuditLogger,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<usize> {
    if retention_days == 0 {
        return Err(AuditError::InvalidQuery(
            "retention period must be at least one day".to_string(),
        ));
    }

    let cutoff = days_before(now, i64::from(retention_days))?;
    let deleted = logger.purge_before(cutoff).await?;

    logger
        .record(
            AuditEvent::new(AuditEventType::RetentionCleanup)
                .with_actor(Some("retention"))
                .with_payload(serde_json::json!({
                    "retention_days": retention_days,
                    "cutoff": cutoff,
                    "deleted": deleted,
                })),
        )
        .await?;

    info!(retention_days, deleted, cutoff = %cutoff, "Audit retention cleanup finished");

    Ok(deleted)
}
