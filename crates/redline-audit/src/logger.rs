//! Audit logger backends

use crate::event::{AuditEvent, AuditEventType, AuditSeverity};
use crate::{AuditError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Audit event filter for querying
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub workflow_id: Option<String>,
    pub execution_id: Option<String>,
    pub event_types: Option<Vec<AuditEventType>>,
    pub actor_id: Option<String>,
    pub severity_min: Option<AuditSeverity>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Matches events carrying at least one of these tags
    pub compliance_tags: Option<BTreeSet<String>>,
}

impl AuditFilter {
    pub fn for_execution(execution_id: &str) -> Self {
        Self {
            execution_id: Some(execution_id.to_string()),
            ..Default::default()
        }
    }

    pub fn for_workflow(workflow_id: &str) -> Self {
        Self {
            workflow_id: Some(workflow_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_event_types(mut self, types: Vec<AuditEventType>) -> Self {
        self.event_types = Some(types);
        self
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// Reject filters that can never match
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(AuditError::InvalidQuery(format!(
                    "start_time {} is after end_time {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// Check whether an event passes every populated criterion
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(ref workflow_id) = self.workflow_id {
            if event.workflow_id.as_ref() != Some(workflow_id) {
                return false;
            }
        }
        if let Some(ref execution_id) = self.execution_id {
            if event.execution_id.as_ref() != Some(execution_id) {
                return false;
            }
        }
        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(ref actor_id) = self.actor_id {
            if event.actor_id.as_ref() != Some(actor_id) {
                return false;
            }
        }
        if let Some(min_severity) = self.severity_min {
            if event.severity < min_severity {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }
        if let Some(ref tags) = self.compliance_tags {
            if !tags.is_empty() && event.compliance_tags.is_disjoint(tags) {
                return false;
            }
        }
        true
    }
}

/// Audit logger trait for different backends
#[async_trait::async_trait]
pub trait AuditLogger: Send + Sync {
    /// Append an audit event
    async fn record(&self, event: AuditEvent) -> Result<()>;

    /// Query audit events in insertion order
    async fn query(&self, filter: &AuditFilter, limit: usize, offset: usize)
        -> Result<Vec<AuditEvent>>;

    /// Remove events older than the cutoff, returning how many were removed
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Tracing-based audit logger (logs to tracing/structured logging)
#[derive(Debug, Clone, Default)]
pub struct TracingAuditLogger;

#[async_trait::async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let json = serde_json::to_string(&event)?;

        match event.severity {
            AuditSeverity::Critical | AuditSeverity::High => {
                warn!(
                    audit = true,
                    event_type = event.event_type.as_str(),
                    severity = event.severity.as_str(),
                    workflow_id = ?event.workflow_id,
                    execution_id = ?event.execution_id,
                    actor_id = ?event.actor_id,
                    "AUDIT: {}", json
                );
            }
            _ => {
                info!(
                    audit = true,
                    event_type = event.event_type.as_str(),
                    severity = event.severity.as_str(),
                    workflow_id = ?event.workflow_id,
                    execution_id = ?event.execution_id,
                    actor_id = ?event.actor_id,
                    "AUDIT: {}", json
                );
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        _filter: &AuditFilter,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<AuditEvent>> {
        // Tracing logger doesn't support querying
        Ok(Vec::new())
    }

    async fn purge_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }
}

/// In-memory audit logger
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditLogger {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl AuditLogger for InMemoryAuditLogger {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>> {
        filter.validate()?;
        let events = self.events.read().await;

        Ok(events
            .iter()
            .filter(|e| filter.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok(before - events.len())
    }
}

/// Composite audit logger that records to multiple backends
#[derive(Default)]
pub struct CompositeAuditLogger {
    loggers: Vec<Arc<dyn AuditLogger>>,
}

impl CompositeAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.loggers.push(logger);
        self
    }
}

#[async_trait::async_trait]
impl AuditLogger for CompositeAuditLogger {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let mut first_error = None;
        for logger in &self.loggers {
            if let Err(e) = logger.record(event.clone()).await {
                warn!(error = %e, event_id = %event.id, "Audit backend rejected event");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>> {
        // Query from first logger that returns results
        for logger in &self.loggers {
            let results = logger.query(filter, limit, offset).await?;
            if !results.is_empty() {
                return Ok(results);
            }
        }
        Ok(Vec::new())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for logger in &self.loggers {
            removed = removed.max(logger.purge_before(cutoff).await?);
        }
        Ok(removed)
    }
}
