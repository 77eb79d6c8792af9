//! Workflow execution state
//!
//! One [`WorkflowState`] is created per execution and threaded through every
//! transition. It is owned by exactly one engine task; step executors only
//! ever see it by shared reference.

use crate::classify::{ClassifiedError, ErrorKind};
use crate::merge;
use crate::step::StepKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// States of the workflow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ValidatingInput,
    Analyzing,
    Negotiating,
    Communicating,
    ErrorRecovery,
    Finalized,
    Failed,
}

impl Phase {
    /// Phases that execute steps, in pipeline order
    pub const WORK_ORDER: [Phase; 4] = [
        Phase::ValidatingInput,
        Phase::Analyzing,
        Phase::Negotiating,
        Phase::Communicating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ValidatingInput => "validating_input",
            Phase::Analyzing => "analyzing",
            Phase::Negotiating => "negotiating",
            Phase::Communicating => "communicating",
            Phase::ErrorRecovery => "error_recovery",
            Phase::Finalized => "finalized",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Finalized | Phase::Failed)
    }

    /// Step kind executed while in this phase
    pub fn step_kind(&self) -> Option<StepKind> {
        match self {
            Phase::ValidatingInput => Some(StepKind::Validate),
            Phase::Analyzing => Some(StepKind::Analyze),
            Phase::Negotiating => Some(StepKind::Negotiate),
            Phase::Communicating => Some(StepKind::Communicate),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible execution status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initialized,
    Running { step: String },
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// Outcome of a single step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub step_name: String,
    pub kind: StepKind,
    pub output: serde_json::Value,
    /// Aggregate score reported with the output
    #[serde(default)]
    pub score: Option<f64>,
    pub succeeded: bool,
    /// Retry count at the time the step ran
    pub attempt: u32,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Entry in the append-only error history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub step: String,
    pub kind: ErrorKind,
    pub timestamp: DateTime<Utc>,
    /// Set once a later retry of the same phase succeeded
    pub resolved: bool,
}

impl From<&ClassifiedError> for ErrorRecord {
    fn from(error: &ClassifiedError) -> Self {
        Self {
            message: error.message.clone(),
            step: error.step.clone(),
            kind: error.kind,
            timestamp: Utc::now(),
            resolved: false,
        }
    }
}

/// One edge taken through the state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// Execution-scoped options
///
/// Unrecognised keys land in `extra` and are available to custom branching
/// rules and step executors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Lowers the template's retry budget; never raises it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Maximum number of transitions before the execution is aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<u32>,
    /// Per step kind switch between model-backed and rule-based execution
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub use_ai_for_step: HashMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_category: Option<String>,
    /// Caller preference such as "fast" or "thorough"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionConfig {
    pub fn with_preference(mut self, preference: &str) -> Self {
        self.preference = Some(preference.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.document_category = Some(category.to_string());
        self
    }

    pub fn with_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Structural checks performed before any step runs
    pub fn validate(&self) -> Result<(), String> {
        if self.recursion_limit == Some(0) {
            return Err("recursion_limit must be at least 1".to_string());
        }
        for key in self.use_ai_for_step.keys() {
            key.parse::<StepKind>()
                .map_err(|_| format!("use_ai_for_step names unknown step kind '{}'", key))?;
        }
        Ok(())
    }

    pub fn uses_ai_for(&self, kind: StepKind) -> bool {
        self.use_ai_for_step
            .iter()
            .any(|(k, enabled)| *enabled && k.parse::<StepKind>().ok() == Some(kind))
    }
}

/// Compiled view produced when an execution finalizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub execution_id: String,
    pub template_id: String,
    pub input_name: String,
    pub risks: Vec<serde_json::Value>,
    pub redlines: Vec<serde_json::Value>,
    pub draft: Option<String>,
    /// Every successful step payload keyed by step ID
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub overall_score: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub warnings: Vec<String>,
    pub applied_rules: Vec<String>,
}

/// The unit of data threaded through an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub execution_id: String,
    pub template_id: String,
    pub template_version: u32,
    pub input_document: String,
    pub input_name: String,
    pub step_results: Vec<StepResult>,
    pub overall_score: Option<f64>,
    pub status: ExecutionStatus,
    pub current_step: String,
    pub phase: Phase,
    /// Phase to resume when recovery decides to retry
    pub failed_phase: Option<Phase>,
    pub error_history: Vec<ErrorRecord>,
    pub warnings: Vec<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub config: ExecutionConfig,
    pub transitions: Vec<TransitionRecord>,
    pub applied_rules: Vec<String>,
    pub final_result: Option<WorkflowResult>,
}

impl WorkflowState {
    pub fn new(
        execution_id: impl Into<String>,
        template_id: impl Into<String>,
        document: impl Into<String>,
        name: impl Into<String>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            template_id: template_id.into(),
            template_version: 0,
            input_document: document.into(),
            input_name: name.into(),
            step_results: Vec::new(),
            overall_score: None,
            status: ExecutionStatus::Initialized,
            current_step: String::new(),
            phase: Phase::ValidatingInput,
            failed_phase: None,
            error_history: Vec::new(),
            warnings: Vec::new(),
            retry_count: 0,
            started_at: None,
            ended_at: None,
            duration_seconds: None,
            config,
            transitions: Vec::new(),
            applied_rules: Vec::new(),
            final_result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the execution ever entered `phase`
    pub fn entered(&self, phase: Phase) -> bool {
        self.transitions.iter().any(|t| t.to == phase)
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.error_history.last()
    }

    pub fn has_unresolved_errors(&self) -> bool {
        self.error_history.iter().any(|e| !e.resolved)
    }

    /// Mark every open error raised by steps of `phase` as resolved
    pub fn resolve_errors(&mut self, step_ids: &[String], phase: Phase) {
        for record in self.error_history.iter_mut().filter(|e| !e.resolved) {
            if record.step == phase.as_str() || step_ids.contains(&record.step) {
                record.resolved = true;
            }
        }
    }

    /// Successful payloads of one kind, in execution order
    pub fn outputs_of(&self, kind: StepKind) -> Vec<&serde_json::Value> {
        self.step_results
            .iter()
            .filter(|r| r.succeeded && r.kind == kind)
            .map(|r| &r.output)
            .collect()
    }

    /// Merged risk items reported by the analysis steps
    pub fn risks(&self) -> Vec<serde_json::Value> {
        let outputs: Vec<_> = self.outputs_of(StepKind::Analyze).into_iter().cloned().collect();
        merge::merge_outputs(StepKind::Analyze, &outputs)
            .get("risks")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }

    pub fn elapsed_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let ended = self.ended_at.unwrap_or_else(Utc::now);
        Some((ended - started).num_milliseconds() as f64 / 1000.0)
    }

    /// Flatten every step output into the final result view
    pub fn compile_result(&self) -> WorkflowResult {
        let merged = |kind: StepKind| {
            let outputs: Vec<_> = self.outputs_of(kind).into_iter().cloned().collect();
            merge::merge_outputs(kind, &outputs)
        };

        let redlines = merged(StepKind::Negotiate)
            .get("redlines")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let draft = merged(StepKind::Communicate)
            .get("draft")
            .and_then(|v| v.as_str())
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let outputs = self
            .step_results
            .iter()
            .filter(|r| r.succeeded)
            .map(|r| (r.step_id.clone(), r.output.clone()))
            .collect();

        WorkflowResult {
            execution_id: self.execution_id.clone(),
            template_id: self.template_id.clone(),
            input_name: self.input_name.clone(),
            risks: self.risks(),
            redlines,
            draft,
            outputs,
            overall_score: self.overall_score,
            duration_seconds: self.elapsed_seconds(),
            warnings: self.warnings.clone(),
            applied_rules: self.applied_rules.clone(),
        }
    }
}
