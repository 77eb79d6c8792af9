//! Application wiring and command dispatch

use anyhow::{bail, Context, Result};
use redline_audit::{AuditLogger, CompositeAuditLogger, InMemoryAuditLogger, TracingAuditLogger};
use redline_core::AppConfig;
use redline_workflow::{
    ExecutionConfig, ExecutionStatus, KeywordStepExecutor, Orchestrator, Schedule, ScheduleType,
    TemplateFilter, WorkflowInput, WorkflowState,
};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{interval_at, Instant};
use tracing::{error, info, warn};

use crate::cli::{Args, Command};

/// Schedule entry as written in a `--schedules` file
#[derive(Debug, Deserialize)]
struct ScheduleEntry {
    template_id: String,
    schedule_type: ScheduleType,
    #[serde(default)]
    expression: String,
    input: WorkflowInput,
    #[serde(default)]
    max_fires: Option<u32>,
    #[serde(default)]
    actor_id: Option<String>,
}

impl ScheduleEntry {
    fn into_schedule(self) -> Schedule {
        let mut schedule = Schedule::new(
            &self.template_id,
            self.schedule_type,
            &self.expression,
            self.input,
        );
        if let Some(max) = self.max_fires {
            schedule = schedule.with_max_fires(max);
        }
        if let Some(ref actor) = self.actor_id {
            schedule = schedule.with_actor(actor);
        }
        schedule
    }
}

/// Main application state
pub struct App {
    args: Args,
    orchestrator: Arc<Orchestrator>,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid arguments")?;

        let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
        info!(
            service = %config.telemetry.service_name,
            retention_days = config.audit.retention_days,
            "Configuration loaded"
        );

        let audit = build_audit_logger(&config);
        let orchestrator = Orchestrator::new(config, Arc::new(KeywordStepExecutor::new()), audit)
            .await
            .context("Failed to initialize orchestrator")?;

        Ok(Self {
            args,
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// Run the selected command to completion
    pub async fn run(self) -> Result<()> {
        match self.args.command.clone() {
            Command::Serve { schedules } => self.serve(schedules).await,
            Command::Run {
                template,
                document,
                preference,
                category,
                max_retries,
                actor,
            } => {
                let config = ExecutionConfig {
                    max_retries,
                    document_category: category,
                    preference,
                    actor_id: actor,
                    ..ExecutionConfig::default()
                };
                self.review(&template, &document, config).await
            }
            Command::Templates {
                category,
                include_inactive,
            } => {
                let filter = TemplateFilter {
                    category,
                    include_inactive,
                    ..TemplateFilter::default()
                };
                self.list_templates(&filter).await
            }
        }
    }

    async fn serve(&self, schedules: Option<PathBuf>) -> Result<()> {
        if let Some(path) = schedules {
            let count = self.register_schedules(&path).await?;
            info!(count, path = %path.display(), "Registered schedules");
        }

        let config = self.orchestrator.config();
        let scheduler_task = if config.scheduler.enabled {
            let scheduler = Arc::clone(self.orchestrator.scheduler());
            Some(tokio::spawn(async move { scheduler.start().await }))
        } else {
            warn!("Scheduler disabled by configuration");
            None
        };

        let retention_task = tokio::spawn(retention_sweep(Arc::clone(&self.orchestrator)));

        info!("Worker running, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");

        self.orchestrator.scheduler().stop().await;
        retention_task.abort();
        if let Some(task) = scheduler_task {
            task.abort();
        }

        Ok(())
    }

    async fn register_schedules(&self, path: &Path) -> Result<usize> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let entries: Vec<ScheduleEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid schedule file {}", path.display()))?;

        let count = entries.len();
        for entry in entries {
            let template_id = entry.template_id.clone();
            self.orchestrator
                .create_schedule(entry.into_schedule())
                .await
                .with_context(|| format!("Failed to schedule template '{}'", template_id))?;
        }
        Ok(count)
    }

    async fn review(&self, template_id: &str, document: &Path, config: ExecutionConfig) -> Result<()> {
        let text = tokio::fs::read_to_string(document)
            .await
            .with_context(|| format!("Failed to read {}", document.display()))?;
        let name = document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| document.display().to_string());

        let state = self
            .orchestrator
            .execute_with_template(template_id, WorkflowInput::new(&name, text).with_config(config))
            .await?;

        println!("{}", serde_json::to_string_pretty(&summarize(&state))?);

        if state.status == ExecutionStatus::Failed {
            bail!("Review of '{}' failed after {} retries", name, state.retry_count);
        }
        Ok(())
    }

    async fn list_templates(&self, filter: &TemplateFilter) -> Result<()> {
        let templates = self.orchestrator.list_templates(filter).await?;
        for template in templates {
            println!(
                "{}\tv{}\t{}\t{}{}",
                template.id,
                template.version,
                template.category,
                template.name,
                if template.is_active { "" } else { " (inactive)" }
            );
        }
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from_file(&path.to_string_lossy())?,
        None => AppConfig::load()?,
    };
    Ok(config)
}

fn build_audit_logger(config: &AppConfig) -> Arc<dyn AuditLogger> {
    let store: Arc<dyn AuditLogger> = Arc::new(InMemoryAuditLogger::new());
    if !config.audit.log_to_tracing {
        return store;
    }
    Arc::new(
        CompositeAuditLogger::new()
            .add_logger(store)
            .add_logger(Arc::new(TracingAuditLogger)),
    )
}

fn summarize(state: &WorkflowState) -> serde_json::Value {
    json!({
        "execution_id": state.execution_id,
        "template_id": state.template_id,
        "template_version": state.template_version,
        "status": state.status,
        "retry_count": state.retry_count,
        "duration_seconds": state.duration_seconds,
        "errors": state.error_history,
        "warnings": state.warnings,
        "result": state.final_result,
    })
}

/// Delete expired audit events on the configured interval
async fn retention_sweep(orchestrator: Arc<Orchestrator>) {
    let period = orchestrator.config().audit.cleanup_interval();
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;
        match orchestrator.cleanup_audit_logs(None).await {
            Ok(removed) => info!(removed, "Audit retention sweep finished"),
            Err(e) => error!(error = %e, "Audit retention sweep failed"),
        }
    }
}
