//! Workflow orchestration for redline contract review
//!
//! This crate provides:
//! - A state-machine engine driving validate, analyze, negotiate and communicate phases
//! - Typed failure classification with bounded, backed-off retries
//! - Conditional branching rules evaluated once per execution
//! - Parallel step groups merged by a deterministic reducer
//! - A versioned template registry with read-only built-ins
//! - Time-based scheduling with cron, delayed and recurring triggers
//! - Concurrency-limited batch execution with cooperative cancellation
//! - An orchestrator facade wiring everything together

pub mod backoff;
pub mod batch;
pub mod branching;
pub mod bulkhead;
pub mod classify;
pub mod cron;
pub mod engine;
pub mod executor;
pub mod merge;
pub mod orchestrator;
pub mod router;
pub mod scheduling;
pub mod schema;
pub mod state;
pub mod step;
pub mod templates;

pub use backoff::{BackoffStrategy, RetryPolicy};
pub use batch::{BatchExecution, BatchItemResult, BatchProcessor, BatchProgress, BatchResult, BatchStatus, ItemStatus};
pub use branching::{BranchAction, BranchCondition, BranchDecision, BranchRule, Comparison, ConditionType};
pub use bulkhead::{Bulkhead, BulkheadPermit};
pub use classify::{ClassifiedError, ErrorClassifier, ErrorKind, StepFailure};
pub use cron::CronExpression;
pub use engine::{WorkflowEngine, WorkflowInput};
pub use executor::KeywordStepExecutor;
pub use orchestrator::Orchestrator;
pub use router::{ExecutionPlan, PlannedStep, RecoveryDecision};
pub use scheduling::{
    FiredExecution, InMemoryScheduleRepository, Schedule, ScheduleRepository, ScheduleType,
    WorkflowScheduler,
};
pub use state::{
    ErrorRecord, ExecutionConfig, ExecutionStatus, Phase, StepResult, TransitionRecord,
    WorkflowResult, WorkflowState,
};
pub use step::{StepExecutor, StepKind, StepOutput, TemplateStep};
pub use templates::{
    InMemoryTemplateRepository, TemplateFilter, TemplateRegistry, TemplateRepository,
    WorkflowTemplate,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Audit error: {0}")]
    Audit(#[from] redline_audit::AuditError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
