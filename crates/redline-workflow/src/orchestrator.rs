//! Orchestrator facade
//!
//! Built once at process start and handed to every caller; owns the template
//! registry, engine, scheduler and batch processor and exposes the operation
//! surface over them.

use crate::batch::{BatchProcessor, BatchProgress, BatchResult};
use crate::engine::{WorkflowEngine, WorkflowInput};
use crate::scheduling::{InMemoryScheduleRepository, Schedule, WorkflowScheduler};
use crate::state::WorkflowState;
use crate::step::StepExecutor;
use crate::templates::{TemplateFilter, TemplateRegistry, WorkflowTemplate};
use crate::Result;
use chrono::Utc;
use redline_audit::{
    cleanup_expired, generate_report, AuditEvent, AuditFilter, AuditLogger, ComplianceReport,
    ReportRange,
};
use redline_core::AppConfig;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

pub struct Orchestrator {
    config: AppConfig,
    audit: Arc<dyn AuditLogger>,
    templates: Arc<TemplateRegistry>,
    engine: Arc<WorkflowEngine>,
    scheduler: Arc<WorkflowScheduler>,
    batches: BatchProcessor,
}

impl Orchestrator {
    /// Wire every component and seed the built-in templates
    pub async fn new(
        config: AppConfig,
        executor: Arc<dyn StepExecutor>,
        audit: Arc<dyn AuditLogger>,
    ) -> Result<Self> {
        let templates = Arc::new(TemplateRegistry::in_memory(Arc::clone(&audit)));
        templates.seed_builtins().await?;

        let engine = Arc::new(
            WorkflowEngine::new(Arc::clone(&templates), executor, Arc::clone(&audit))
                .with_config(config.engine.clone()),
        );
        let scheduler = Arc::new(
            WorkflowScheduler::new(
                Arc::new(InMemoryScheduleRepository::new()),
                Arc::clone(&engine),
                Arc::clone(&audit),
            )
            .with_poll_interval(config.scheduler.poll_interval()),
        );
        let batches = BatchProcessor::new(
            Arc::clone(&engine),
            Arc::clone(&audit),
            config.batch.clone(),
        );

        info!(
            service = %config.telemetry.service_name,
            scheduler_enabled = config.scheduler.enabled,
            "Orchestrator initialized"
        );

        Ok(Self {
            config,
            audit,
            templates,
            engine,
            scheduler,
            batches,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Arc<WorkflowScheduler> {
        &self.scheduler
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    // Templates

    pub async fn create_template(
        &self,
        template: WorkflowTemplate,
        actor_id: Option<&str>,
    ) -> Result<WorkflowTemplate> {
        self.templates.create(template, actor_id).await
    }

    pub async fn publish_template_version(
        &self,
        template: WorkflowTemplate,
        actor_id: Option<&str>,
    ) -> Result<WorkflowTemplate> {
        self.templates.publish_version(template, actor_id).await
    }

    pub async fn get_template(&self, id: &str) -> Result<WorkflowTemplate> {
        self.templates.get(id).await
    }

    pub async fn list_templates(&self, filter: &TemplateFilter) -> Result<Vec<WorkflowTemplate>> {
        self.templates.list(filter).await
    }

    pub async fn deactivate_template(&self, id: &str, actor_id: Option<&str>) -> Result<()> {
        self.templates.deactivate(id, actor_id).await
    }

    // Execution

    /// Run one input to a terminal state
    ///
    /// An unknown template is reported as an error; every other failure comes
    /// back as a `Failed` state.
    pub async fn execute_with_template(
        &self,
        template_id: &str,
        input: WorkflowInput,
    ) -> Result<WorkflowState> {
        self.templates.get(template_id).await?;
        Ok(self.engine.execute(template_id, input).await)
    }

    // Scheduling

    pub async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        self.scheduler.create(schedule).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.scheduler.list().await
    }

    // Batches

    pub async fn create_batch(
        &self,
        template_id: &str,
        items: Vec<WorkflowInput>,
        max_concurrency: Option<usize>,
        actor_id: Option<&str>,
    ) -> Result<String> {
        self.batches
            .create_batch(template_id, items, max_concurrency, actor_id)
            .await
    }

    pub async fn execute_batch(&self, batch_id: &str) -> Result<BatchResult> {
        self.batches.execute(batch_id).await
    }

    pub fn get_batch_status(&self, batch_id: &str) -> Result<BatchProgress> {
        self.batches.get_status(batch_id)
    }

    pub async fn cancel_batch(&self, batch_id: &str, actor_id: Option<&str>) -> Result<bool> {
        self.batches.cancel(batch_id, actor_id).await
    }

    pub fn list_active_batches(&self) -> Vec<BatchProgress> {
        self.batches.list_active()
    }

    // Audit and compliance

    pub async fn query_audit_logs(
        &self,
        filter: &AuditFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEvent>> {
        Ok(self.audit.query(filter, limit, offset).await?)
    }

    pub async fn generate_compliance_report(
        &self,
        range: ReportRange,
        tags: Option<BTreeSet<String>>,
    ) -> Result<ComplianceReport> {
        Ok(generate_report(self.audit.as_ref(), range, tags).await?)
    }

    /// Delete events older than the retention window
    ///
    /// Falls back to the configured retention when `retention_days` is `None`.
    pub async fn cleanup_audit_logs(&self, retention_days: Option<u32>) -> Result<usize> {
        let days = retention_days.unwrap_or(self.config.audit.retention_days);
        Ok(cleanup_expired(self.audit.as_ref(), days, Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::KeywordStepExecutor;
    use crate::state::ExecutionStatus;
    use crate::WorkflowError;
    use redline_audit::InMemoryAuditLogger;

    async fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            AppConfig::default(),
            Arc::new(KeywordStepExecutor::new()),
            Arc::new(InMemoryAuditLogger::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_builtins_are_seeded() {
        let orchestrator = orchestrator().await;
        let templates = orchestrator.list_templates(&TemplateFilter::default()).await.unwrap();
        assert_eq!(templates.len(), 4);
        assert!(orchestrator.get_template("standard_review").await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_with_unknown_template_is_an_error() {
        let orchestrator = orchestrator().await;
        let result = orchestrator
            .execute_with_template("missing", WorkflowInput::new("a.txt", "text"))
            .await;
        assert!(matches!(result, Err(WorkflowError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_standard_review_end_to_end() {
        let orchestrator = orchestrator().await;
        let state = orchestrator
            .execute_with_template(
                "standard_review",
                WorkflowInput::new(
                    "msa.txt",
                    "Supplier shall indemnify Customer and accepts unlimited liability.",
                ),
            )
            .await
            .unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        let result = state.final_result.unwrap();
        assert_eq!(result.risks.len(), 2);
        assert_eq!(result.redlines.len(), 2);
        assert!(result.draft.is_some());

        let events = orchestrator
            .query_audit_logs(&AuditFilter::for_execution(&state.execution_id), 100, 0)
            .await
            .unwrap();
        assert_eq!(events.len(), state.transitions.len() + 1);
    }

    #[tokio::test]
    async fn test_compliance_report_and_cleanup() {
        let orchestrator = orchestrator().await;
        orchestrator
            .execute_with_template("quick_scan", WorkflowInput::new("nda.txt", "Mutual confidentiality."))
            .await
            .unwrap();

        let report = orchestrator
            .generate_compliance_report(ReportRange::last_days(1).unwrap(), None)
            .await
            .unwrap();
        assert!(report.total_events > 0);

        assert_eq!(orchestrator.cleanup_audit_logs(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_with_out_of_range_retention_is_an_error() {
        let orchestrator = orchestrator().await;
        let result = orchestrator.cleanup_audit_logs(Some(u32::MAX)).await;
        assert!(matches!(result, Err(WorkflowError::Audit(_))));
    }
}
