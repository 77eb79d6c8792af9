//! Batch processing
//!
//! Fans one template out over many inputs behind a [`Bulkhead`]. Items are
//! isolated from each other: a failing item never aborts its siblings.
//! Progress lives in a per-batch record that readers can snapshot while the
//! batch runs; terminal batches move to an archive so repeated status reads
//! return the same snapshot. The archive keeps the most recently finished
//! batches up to the configured bound.

use crate::bulkhead::Bulkhead;
use crate::engine::{WorkflowEngine, WorkflowInput};
use crate::state::{ExecutionStatus, WorkflowResult, WorkflowState};
use crate::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use redline_audit::{AuditEvent, AuditEventType, AuditLogger};
use redline_core::BatchConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Never started because the batch was cancelled
    Skipped,
}

/// Outcome of one batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub name: String,
    pub status: ItemStatus,
    pub execution_id: Option<String>,
    pub result: Option<WorkflowResult>,
    pub error: Option<String>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub index: usize,
    pub message: String,
}

/// A batch and the status of each of its items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExecution {
    pub id: String,
    pub template_id: String,
    pub items: Vec<WorkflowInput>,
    pub max_concurrency: usize,
    pub status: BatchStatus,
    pub item_results: BTreeMap<usize, BatchItemResult>,
    pub errors: Vec<BatchError>,
    pub actor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Point-in-time progress of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub template_id: String,
    pub status: BatchStatus,
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: f64,
    pub errors: Vec<BatchError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate result of a finished batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub template_id: String,
    pub status: BatchStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: f64,
    pub items: Vec<BatchItemResult>,
    pub duration_seconds: Option<f64>,
}

impl BatchExecution {
    fn new(
        template_id: &str,
        items: Vec<WorkflowInput>,
        max_concurrency: usize,
        actor_id: Option<&str>,
    ) -> Self {
        let item_results = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                (
                    index,
                    BatchItemResult {
                        index,
                        name: item.name.clone(),
                        status: ItemStatus::Pending,
                        execution_id: None,
                        result: None,
                        error: None,
                        duration_seconds: None,
                    },
                )
            })
            .collect();

        Self {
            id: format!("batch_{}", Uuid::new_v4().simple()),
            template_id: template_id.to_string(),
            items,
            max_concurrency,
            status: BatchStatus::Pending,
            item_results,
            errors: Vec::new(),
            actor_id: actor_id.map(str::to_string),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.item_results
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.count(ItemStatus::Completed) as f64 / self.total() as f64
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            batch_id: self.id.clone(),
            template_id: self.template_id.clone(),
            status: self.status,
            total: self.total(),
            pending: self.count(ItemStatus::Pending),
            running: self.count(ItemStatus::Running),
            succeeded: self.count(ItemStatus::Completed),
            failed: self.count(ItemStatus::Failed),
            skipped: self.count(ItemStatus::Skipped),
            success_rate: self.success_rate(),
            errors: self.errors.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    pub fn result(&self) -> BatchResult {
        let duration_seconds = match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };

        BatchResult {
            batch_id: self.id.clone(),
            template_id: self.template_id.clone(),
            status: self.status,
            total: self.total(),
            succeeded: self.count(ItemStatus::Completed),
            failed: self.count(ItemStatus::Failed),
            skipped: self.count(ItemStatus::Skipped),
            success_rate: self.success_rate(),
            items: self.item_results.values().cloned().collect(),
            duration_seconds,
        }
    }

    fn set_item(&mut self, index: usize, status: ItemStatus) -> Option<&mut BatchItemResult> {
        let item = self.item_results.get_mut(&index)?;
        item.status = status;
        Some(item)
    }

    fn mark_running(&mut self, index: usize, execution_id: &str) {
        if let Some(item) = self.set_item(index, ItemStatus::Running) {
            item.execution_id = Some(execution_id.to_string());
        }
    }

    fn mark_skipped(&mut self, index: usize) {
        self.set_item(index, ItemStatus::Skipped);
    }

    fn record_failure(&mut self, index: usize, message: String) {
        if let Some(item) = self.set_item(index, ItemStatus::Failed) {
            item.error = Some(message.clone());
        }
        self.errors.push(BatchError { index, message });
    }

    fn record_outcome(&mut self, index: usize, state: &WorkflowState) {
        if state.status == ExecutionStatus::Completed {
            if let Some(item) = self.set_item(index, ItemStatus::Completed) {
                item.result = state.final_result.clone();
                item.duration_seconds = state.duration_seconds;
            }
            return;
        }

        let message = state
            .last_error()
            .map(|e| format!("{}: {}", e.kind, e.message))
            .unwrap_or_else(|| "execution failed".to_string());
        self.record_failure(index, message);
        if let Some(item) = self.item_results.get_mut(&index) {
            item.duration_seconds = state.duration_seconds;
        }
    }
}

struct BatchEntry {
    execution: RwLock<BatchExecution>,
    cancelled: AtomicBool,
    gate: Bulkhead,
}

/// Concurrency-limited fan-out of template executions
pub struct BatchProcessor {
    engine: Arc<WorkflowEngine>,
    audit: Arc<dyn AuditLogger>,
    config: BatchConfig,
    active: DashMap<String, Arc<BatchEntry>>,
    completed: DashMap<String, BatchExecution>,
}

impl BatchProcessor {
    pub fn new(engine: Arc<WorkflowEngine>, audit: Arc<dyn AuditLogger>, config: BatchConfig) -> Self {
        Self {
            engine,
            audit,
            config,
            active: DashMap::new(),
            completed: DashMap::new(),
        }
    }

    /// Register a batch; concurrency is clamped to the configured limit
    pub async fn create_batch(
        &self,
        template_id: &str,
        items: Vec<WorkflowInput>,
        max_concurrency: Option<usize>,
        actor_id: Option<&str>,
    ) -> Result<String> {
        if items.is_empty() {
            return Err(WorkflowError::Validation(
                "a batch needs at least one item".to_string(),
            ));
        }
        let template = self.engine.templates().get(template_id).await?;

        let concurrency = self.config.effective_concurrency(max_concurrency);
        let batch = BatchExecution::new(template_id, items, concurrency, actor_id);
        let batch_id = batch.id.clone();
        let total = batch.total();

        self.active.insert(
            batch_id.clone(),
            Arc::new(BatchEntry {
                execution: RwLock::new(batch),
                cancelled: AtomicBool::new(false),
                gate: Bulkhead::new(&format!("batch-{}", batch_id), concurrency),
            }),
        );

        let event = AuditEvent::new(AuditEventType::BatchCreated)
            .with_workflow(template_id)
            .with_actor(actor_id)
            .with_tags(template.compliance_tags.iter().cloned())
            .with_payload(serde_json::json!({
                "batch_id": batch_id,
                "items": total,
                "max_concurrency": concurrency,
            }));
        self.audit.record(event).await?;

        info!(
            batch_id = %batch_id,
            template_id = %template_id,
            items = total,
            max_concurrency = concurrency,
            "Created batch"
        );

        Ok(batch_id)
    }

    /// Run every item and wait for the aggregate result
    ///
    /// Executing a batch that already finished returns its archived result.
    pub async fn execute(&self, batch_id: &str) -> Result<BatchResult> {
        if let Some(done) = self.completed.get(batch_id) {
            return Ok(done.result());
        }

        let entry = self.entry(batch_id)?;

        let (template_id, items) = {
            let mut batch = entry.execution.write();
            if batch.status != BatchStatus::Pending {
                return Err(WorkflowError::InvalidState(format!(
                    "batch {} is {:?}",
                    batch_id, batch.status
                )));
            }
            batch.status = BatchStatus::Running;
            batch.started_at = Some(Utc::now());
            (batch.template_id.clone(), batch.items.clone())
        };

        info!(
            batch_id = %batch_id,
            items = items.len(),
            max_concurrency = entry.gate.max_concurrent(),
            "Executing batch"
        );

        let mut handles = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            let entry = Arc::clone(&entry);
            let template_id = template_id.clone();

            let handle = tokio::spawn(async move {
                run_item(engine, entry, template_id, index, item).await
            });
            handles.push((index, handle));
        }

        for (index, handle) in handles {
            if let Err(e) = handle.await {
                error!(batch_id = %batch_id, index, error = %e, "Batch item task aborted");
                entry
                    .execution
                    .write()
                    .record_failure(index, format!("item task aborted: {}", e));
            }
        }

        self.finish(batch_id, &entry).await
    }

    pub fn get_status(&self, batch_id: &str) -> Result<BatchProgress> {
        if let Some(entry) = self.active.get(batch_id) {
            return Ok(entry.execution.read().progress());
        }
        self.completed
            .get(batch_id)
            .map(|b| b.progress())
            .ok_or_else(|| WorkflowError::NotFound(format!("batch {}", batch_id)))
    }

    /// Aggregate result of a finished batch
    pub fn get_result(&self, batch_id: &str) -> Result<BatchResult> {
        self.completed
            .get(batch_id)
            .map(|b| b.result())
            .ok_or_else(|| WorkflowError::NotFound(format!("completed batch {}", batch_id)))
    }

    /// Stop new items from starting; in-flight items run to completion
    ///
    /// Queued items are released from the gate and end up skipped. Returns false when the batch already reached a terminal status.
    pub async fn cancel(&self, batch_id: &str, actor_id: Option<&str>) -> Result<bool> {
        if self.completed.contains_key(batch_id) {
            return Ok(false);
        }
        let entry = self.entry(batch_id)?;

        let (was_pending, template_id) = {
            let mut batch = entry.execution.write();
            if batch.status.is_terminal() {
                return Ok(false);
            }
            entry.cancelled.store(true, Ordering::SeqCst);
            entry.gate.close();
            let was_pending = batch.status == BatchStatus::Pending;
            batch.status = BatchStatus::Cancelled;
            (was_pending, batch.template_id.clone())
        };

        let event = AuditEvent::new(AuditEventType::BatchCancelled)
            .with_workflow(&template_id)
            .with_actor(actor_id)
            .with_payload(serde_json::json!({ "batch_id": batch_id, "started": !was_pending }));
        self.audit.record(event).await?;

        warn!(batch_id = %batch_id, "Batch cancelled");

        if was_pending {
            self.finish(batch_id, &entry).await?;
        }
        Ok(true)
    }

    pub fn list_active(&self) -> Vec<BatchProgress> {
        let mut active: Vec<BatchProgress> = self
            .active
            .iter()
            .map(|entry| entry.execution.read().progress())
            .collect();
        active.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        active
    }

    /// Drop the oldest archived batches beyond the configured bound
    fn evict_archived(&self) {
        let limit = self.config.max_completed_batches.max(1);
        while self.completed.len() > limit {
            let oldest = self
                .completed
                .iter()
                .min_by_key(|b| (b.completed_at, b.created_at))
                .map(|b| b.key().clone());
            let Some(batch_id) = oldest else {
                break;
            };
            self.completed.remove(&batch_id);
            debug!(batch_id = %batch_id, "Evicted archived batch");
        }
    }

    fn entry(&self, batch_id: &str) -> Result<Arc<BatchEntry>> {
        self.active
            .get(batch_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| WorkflowError::NotFound(format!("batch {}", batch_id)))
    }

    async fn finish(&self, batch_id: &str, entry: &BatchEntry) -> Result<BatchResult> {
        let snapshot = {
            let mut batch = entry.execution.write();
            let never_started: Vec<usize> = batch
                .item_results
                .values()
                .filter(|r| r.status == ItemStatus::Pending)
                .map(|r| r.index)
                .collect();
            for index in never_started {
                batch.mark_skipped(index);
            }

            let failed = batch.count(ItemStatus::Failed);
            batch.status = if entry.cancelled.load(Ordering::SeqCst) {
                BatchStatus::Cancelled
            } else if failed == batch.total() {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
            batch.completed_at = Some(Utc::now());
            batch.clone()
        };

        // A batch is always visible in one of the two maps
        self.completed.insert(batch_id.to_string(), snapshot.clone());
        self.active.remove(batch_id);
        self.evict_archived();

        let result = snapshot.result();

        let event = AuditEvent::new(AuditEventType::BatchCompleted)
            .with_workflow(&snapshot.template_id)
            .with_actor(snapshot.actor_id.as_deref())
            .with_payload(serde_json::json!({
                "batch_id": batch_id,
                "status": result.status,
                "total": result.total,
                "succeeded": result.succeeded,
                "failed": result.failed,
                "skipped": result.skipped,
                "success_rate": result.success_rate,
            }));
        self.audit.record(event).await?;

        info!(
            batch_id = %batch_id,
            status = ?result.status,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            "Batch finished"
        );

        Ok(result)
    }
}

async fn run_item(
    engine: Arc<WorkflowEngine>,
    entry: Arc<BatchEntry>,
    template_id: String,
    index: usize,
    item: WorkflowInput,
) {
    let Some(_permit) = entry.gate.acquire().await else {
        debug!(index, "Batch gate closed before item started");
        entry.execution.write().mark_skipped(index);
        return;
    };

    if entry.cancelled.load(Ordering::SeqCst) {
        debug!(index, "Skipping batch item after cancellation");
        entry.execution.write().mark_skipped(index);
        return;
    }

    let execution_id = Uuid::new_v4().to_string();
    entry.execution.write().mark_running(index, &execution_id);
    debug!(index, in_flight = entry.gate.in_flight(), "Batch item started");

    let state = engine.execute_with_id(execution_id, &template_id, item).await;
    entry.execution.write().record_outcome(index, &state);
}
