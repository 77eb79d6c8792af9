//! Workflow engine with state machine and execution control
//!
//! One call to [`WorkflowEngine::execute`] owns one [`WorkflowState`] from
//! creation to a terminal phase. Every failure is caught at this boundary,
//! classified and either retried or turned into a `Failed` state; callers never
//! see a raw error.

use crate::branching;
use crate::classify::{ClassifiedError, ErrorClassifier, ErrorKind};
use crate::router::{self, ExecutionPlan, PlannedStep, RecoveryDecision};
use crate::schema;
use crate::state::{
    ErrorRecord, ExecutionConfig, ExecutionStatus, Phase, StepResult, TransitionRecord,
    WorkflowState,
};
use crate::step::{StepExecutor, StepKind, StepOutput};
use crate::templates::{TemplateRegistry, WorkflowTemplate};
use chrono::Utc;
use futures::future::join_all;
use redline_audit::{AuditEvent, AuditEventType, AuditLogger};
use redline_core::EngineConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Document and options for one execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInput {
    /// Display name of the document, usually its file name
    pub name: String,
    /// Full contract text handed to every step
    pub document: String,
    /// Per-execution overrides; defaults apply when absent
    #[serde(default)]
    pub config: ExecutionConfig,
}

impl WorkflowInput {
    /// Input with default execution options
    pub fn new(name: &str, document: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            document: document.into(),
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }
}

/// The workflow state machine
///
/// Phases run in a fixed order (validate, analyze, negotiate, communicate)
/// with branching applied once after analysis. Failed phases pass through
/// `ErrorRecovery`, which either re-enters the failed phase or fails the
/// execution. Every transition is written to the audit log.
pub struct WorkflowEngine {
    templates: Arc<TemplateRegistry>,
    executor: Arc<dyn StepExecutor>,
    audit: Arc<dyn AuditLogger>,
    classifier: ErrorClassifier,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Engine with the default [`EngineConfig`]
    pub fn new(
        templates: Arc<TemplateRegistry>,
        executor: Arc<dyn StepExecutor>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            templates,
            executor,
            audit,
            classifier: ErrorClassifier::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replace the engine-wide defaults (timeout, recursion limit)
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registry templates are resolved from at execution start
    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    /// Run a template against one input until it finalizes or fails
    pub async fn execute(&self, template_id: &str, input: WorkflowInput) -> WorkflowState {
        self.execute_with_id(Uuid::new_v4().to_string(), template_id, input)
            .await
    }

    /// Same as [`execute`](Self::execute) with a caller-chosen execution ID
    pub async fn execute_with_id(
        &self,
        execution_id: String,
        template_id: &str,
        input: WorkflowInput,
    ) -> WorkflowState {
        let mut state = WorkflowState::new(
            execution_id,
            template_id,
            input.document,
            input.name,
            input.config,
        );
        state.started_at = Some(Utc::now());
        state.status = ExecutionStatus::Running {
            step: Phase::ValidatingInput.as_str().to_string(),
        };

        let template = match self.templates.get(template_id).await {
            Ok(template) => template,
            Err(e) => {
                let no_tags = BTreeSet::new();
                self.record_started(&state, &no_tags).await;
                let error = ClassifiedError::new(
                    ErrorKind::Configuration,
                    Phase::ValidatingInput.as_str(),
                    e.to_string(),
                );
                self.fail(&mut state, error, &no_tags).await;
                return state;
            }
        };
        state.template_version = template.version;

        info!(
            execution_id = %state.execution_id,
            template_id = %template.id,
            version = template.version,
            "Starting workflow execution"
        );
        self.record_started(&state, &template.compliance_tags).await;

        let budget = if template.timeout_seconds > 0 {
            Duration::from_secs(template.timeout_seconds)
        } else {
            self.config.default_timeout()
        };

        let timed_out = tokio::time::timeout(budget, self.drive(&mut state, &template))
            .await
            .is_err();

        if timed_out && !state.phase.is_terminal() {
            let error = ClassifiedError::new(
                ErrorKind::Timeout,
                state.phase.as_str(),
                format!("execution exceeded its {}s budget", budget.as_secs()),
            );
            self.fail(&mut state, error, &template.compliance_tags).await;
        }

        info!(
            execution_id = %state.execution_id,
            status = ?state.status,
            retries = state.retry_count,
            duration_seconds = ?state.duration_seconds,
            "Workflow execution finished"
        );

        state
    }

    /// Walk the phase machine until a terminal phase is reached
    async fn drive(&self, state: &mut WorkflowState, template: &WorkflowTemplate) {
        let tags = &template.compliance_tags;

        let mut plan = match ExecutionPlan::from_template(template) {
            Ok(plan) => plan,
            Err(e) => {
                let error =
                    ClassifiedError::new(ErrorKind::Configuration, state.phase.as_str(), e.to_string());
                self.fail(state, error, tags).await;
                return;
            }
        };

        let max_retries = template
            .retry_policy
            .effective_max_retries(state.config.max_retries);
        let limit = state
            .config
            .recursion_limit
            .unwrap_or(self.config.recursion_limit);
        let mut branched = false;
        let mut last_error: Option<ClassifiedError> = None;

        while !state.phase.is_terminal() {
            if state.transitions.len() as u32 >= limit {
                let error = ClassifiedError::new(
                    ErrorKind::Configuration,
                    state.phase.as_str(),
                    format!("recursion limit of {} transitions reached", limit),
                );
                self.fail(state, error, tags).await;
                return;
            }

            let phase = state.phase;
            let next = match phase {
                Phase::ErrorRecovery => {
                    let decision = last_error.as_ref().map_or(RecoveryDecision::GiveUp, |e| {
                        router::recover(e, state.retry_count, max_retries, state.failed_phase)
                    });

                    match decision {
                        RecoveryDecision::Retry(resume) => {
                            state.retry_count += 1;
                            let delay = template.retry_policy.delay_for_attempt(state.retry_count);
                            info!(
                                execution_id = %state.execution_id,
                                phase = %resume,
                                attempt = state.retry_count,
                                max_retries,
                                delay_ms = delay.as_millis() as u64,
                                "Retrying workflow phase"
                            );
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            resume
                        }
                        RecoveryDecision::GiveUp => {
                            if let Some(ref e) = last_error {
                                error!(
                                    execution_id = %state.execution_id,
                                    kind = %e.kind,
                                    step = %e.step,
                                    retries = state.retry_count,
                                    error = %e.message,
                                    "Workflow execution failed"
                                );
                            }
                            Phase::Failed
                        }
                    }
                }
                _ => match self.run_phase(state, &plan, phase).await {
                    Ok(()) => {
                        if !branched && (phase == Phase::Analyzing || !plan.has_steps(Phase::Analyzing)) {
                            branched = true;
                            self.apply_branching(state, &mut plan, template, phase);
                        }
                        router::route_success(phase, &plan, state.risks().is_empty())
                    }
                    Err(e) => {
                        state.failed_phase = Some(phase);
                        last_error = Some(e);
                        Phase::ErrorRecovery
                    }
                },
            };

            self.transition(state, next, tags).await;
        }
    }

    fn apply_branching(
        &self,
        state: &mut WorkflowState,
        plan: &mut ExecutionPlan,
        template: &WorkflowTemplate,
        completed: Phase,
    ) {
        if template.branching_rules.is_empty() {
            return;
        }

        let decision = branching::evaluate(&template.branching_rules, state, &state.config);
        let warnings = plan.apply(&decision, completed);

        if !decision.applied_rules.is_empty() {
            debug!(
                execution_id = %state.execution_id,
                rules = ?decision.applied_rules,
                steps = ?plan.step_ids(),
                "Applied branching rules"
            );
        }

        state.applied_rules.extend(decision.applied_rules);
        state.warnings.extend(warnings);
    }

    /// Run the pending steps of one phase, batch by batch
    ///
    /// Steps that already succeeded in an earlier attempt are not re-run, so a
    /// retried parallel group only repeats its failed members. The first
    /// required-step failure ends the phase after its batch completes.
    async fn run_phase(
        &self,
        state: &mut WorkflowState,
        plan: &ExecutionPlan,
        phase: Phase,
    ) -> Result<(), ClassifiedError> {
        state.current_step = phase.as_str().to_string();
        state.status = ExecutionStatus::Running {
            step: phase.as_str().to_string(),
        };

        if phase == Phase::ValidatingInput {
            if let Err(message) = validate_input(state) {
                let error = ClassifiedError::new(ErrorKind::Validation, phase.as_str(), message);
                state.error_history.push(ErrorRecord::from(&error));
                return Err(error);
            }
        }

        let mut first_error: Option<ClassifiedError> = None;

        for batch in plan.batches(phase) {
            let pending: Vec<&PlannedStep> = batch
                .into_iter()
                .filter(|p| {
                    !state
                        .step_results
                        .iter()
                        .any(|r| r.succeeded && r.step_id == p.step.id)
                })
                .collect();
            if pending.is_empty() {
                continue;
            }

            let ids: Vec<&str> = pending.iter().map(|p| p.step.id.as_str()).collect();
            state.current_step = ids.join(",");
            state.status = ExecutionStatus::Running {
                step: state.current_step.clone(),
            };

            // Group members each see their own snapshot of the state
            let snapshots: Vec<WorkflowState> = pending.iter().map(|_| state.clone()).collect();
            let attempts = join_all(
                pending
                    .iter()
                    .zip(&snapshots)
                    .map(|(planned, snapshot)| self.run_step(planned, snapshot)),
            )
            .await;

            for (planned, (outcome, duration_ms)) in pending.iter().zip(attempts) {
                self.apply_attempt(state, planned, outcome, duration_ms, &mut first_error);
            }

            if first_error.is_some() {
                break;
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let best = state
            .step_results
            .iter()
            .filter(|r| r.succeeded)
            .filter_map(|r| r.score)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
        if best.is_some() {
            state.overall_score = best;
        }

        let step_ids: Vec<String> = plan
            .batches(phase)
            .into_iter()
            .flatten()
            .map(|p| p.step.id.clone())
            .collect();
        state.resolve_errors(&step_ids, phase);

        Ok(())
    }

    /// Record one step outcome; optional-step failures become warnings
    fn apply_attempt(
        &self,
        state: &mut WorkflowState,
        planned: &PlannedStep,
        outcome: Result<StepOutput, ClassifiedError>,
        duration_ms: u64,
        first_error: &mut Option<ClassifiedError>,
    ) {
        let step_id = planned.step.id.clone();

        match outcome {
            Ok(output) => {
                let score = output
                    .score
                    .or_else(|| output.payload.get("overall_score").and_then(Value::as_f64));
                state
                    .warnings
                    .extend(output.warnings.iter().map(|w| format!("{}: {}", step_id, w)));
                state.step_results.push(StepResult {
                    step_id: step_id.clone(),
                    step_name: planned.step.name.clone(),
                    kind: planned.kind,
                    output: output.payload,
                    score,
                    succeeded: true,
                    attempt: state.retry_count,
                    duration_ms,
                    completed_at: Utc::now(),
                });

                debug!(
                    execution_id = %state.execution_id,
                    step = %step_id,
                    duration_ms,
                    "Step completed"
                );
            }
            Err(e) => {
                state.step_results.push(StepResult {
                    step_id: step_id.clone(),
                    step_name: planned.step.name.clone(),
                    kind: planned.kind,
                    output: json!({ "error": e.message, "kind": e.kind }),
                    score: None,
                    succeeded: false,
                    attempt: state.retry_count,
                    duration_ms,
                    completed_at: Utc::now(),
                });

                if planned.step.required {
                    warn!(
                        execution_id = %state.execution_id,
                        step = %step_id,
                        kind = %e.kind,
                        error = %e.message,
                        "Step failed"
                    );
                    state.error_history.push(ErrorRecord::from(&e));
                    first_error.get_or_insert(e);
                } else {
                    warn!(
                        execution_id = %state.execution_id,
                        step = %step_id,
                        error = %e.message,
                        "Optional step failed"
                    );
                    state
                        .warnings
                        .push(format!("optional step '{}' failed: {}", step_id, e.message));
                }
            }
        }
    }

    // Returns the outcome and wall time in milliseconds
    async fn run_step(
        &self,
        planned: &PlannedStep,
        snapshot: &WorkflowState,
    ) -> (Result<StepOutput, ClassifiedError>, u64) {
        let started = Instant::now();
        let outcome = match self
            .executor
            .execute(&planned.step, planned.kind, snapshot)
            .await
        {
            Ok(output) => check_output(planned, output),
            Err(failure) => Err(self.classifier.classify(&planned.step.id, failure)),
        };
        (outcome, started.elapsed().as_millis() as u64)
    }

    async fn fail(&self, state: &mut WorkflowState, error: ClassifiedError, tags: &BTreeSet<String>) {
        error!(
            execution_id = %state.execution_id,
            kind = %error.kind,
            step = %error.step,
            error = %error.message,
            "Workflow execution aborted"
        );
        state.error_history.push(ErrorRecord::from(&error));
        self.transition(state, Phase::Failed, tags).await;
    }

    /// Move to `to`, keeping terminal bookkeeping and the audit trail in step
    async fn transition(&self, state: &mut WorkflowState, to: Phase, tags: &BTreeSet<String>) {
        let from = state.phase;
        let now = Utc::now();

        if to.is_terminal() {
            state.ended_at = Some(now);
            state.duration_seconds = state.elapsed_seconds();
            state.current_step = to.as_str().to_string();
            state.status = if to == Phase::Finalized {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
        }

        state.transitions.push(TransitionRecord { from, to, at: now });
        state.phase = to;

        if to == Phase::Finalized {
            state.final_result = Some(state.compile_result());
        }

        let event_type = match to {
            Phase::Finalized => AuditEventType::ExecutionCompleted,
            Phase::Failed => AuditEventType::ExecutionFailed,
            _ => AuditEventType::StateTransition,
        };

        let mut payload = json!({
            "from": from,
            "to": to,
            "retry_count": state.retry_count,
            "template_version": state.template_version,
        });
        if to.is_terminal() {
            payload["duration_seconds"] = json!(state.duration_seconds);
            payload["overall_score"] = json!(state.overall_score);
        }
        if matches!(to, Phase::Failed | Phase::ErrorRecovery) {
            if let Some(last) = state.last_error() {
                payload["error"] = json!({ "kind": last.kind, "step": last.step, "message": last.message });
            }
        }

        debug!(
            execution_id = %state.execution_id,
            from = %from,
            to = %to,
            "Workflow transition"
        );

        let event = AuditEvent::new(event_type)
            .with_workflow(&state.template_id)
            .with_execution(&state.execution_id)
            .with_actor(state.config.actor_id.as_deref())
            .with_tags(tags.iter().cloned())
            .with_payload(payload);

        if let Err(e) = self.audit.record(event).await {
            warn!(execution_id = %state.execution_id, error = %e, "Failed to record audit event");
        }
    }

    /// `ExecutionStarted` is recorded before the template is known to be valid
    async fn record_started(&self, state: &WorkflowState, tags: &BTreeSet<String>) {
        let event = AuditEvent::new(AuditEventType::ExecutionStarted)
            .with_workflow(&state.template_id)
            .with_execution(&state.execution_id)
            .with_actor(state.config.actor_id.as_deref())
            .with_tags(tags.iter().cloned())
            .with_payload(json!({
                "input_name": state.input_name,
                "document_bytes": state.input_document.len(),
                "template_version": state.template_version,
            }));

        if let Err(e) = self.audit.record(event).await {
            warn!(execution_id = %state.execution_id, error = %e, "Failed to record audit event");
        }
    }
}

/// Structural checks that need no step executor
fn validate_input(state: &WorkflowState) -> Result<(), String> {
    if state.input_document.trim().is_empty() {
        return Err("input document is empty".to_string());
    }
    if state.input_name.trim().is_empty() {
        return Err("input name is empty".to_string());
    }
    state.config.validate()
}

/// Schema-check a step payload; a validate step answering `valid: false` rejects the input
fn check_output(planned: &PlannedStep, output: StepOutput) -> Result<StepOutput, ClassifiedError> {
    schema::validate_output(planned.kind, &output.payload)
        .map_err(|m| ClassifiedError::new(ErrorKind::Schema, &planned.step.id, m))?;

    if planned.kind == StepKind::Validate
        && output.payload.get("valid").and_then(Value::as_bool) == Some(false)
    {
        let reason = output
            .payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("input rejected by validation step");
        return Err(ClassifiedError::new(ErrorKind::Validation, &planned.step.id, reason));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::RetryPolicy;
    use crate::classify::StepFailure;
    use crate::step::TemplateStep;
    use async_trait::async_trait;
    use redline_audit::{AuditFilter, InMemoryAuditLogger};

    type Script = dyn Fn(&TemplateStep, StepKind) -> Result<StepOutput, StepFailure> + Send + Sync;

    struct FnExecutor(Box<Script>);

    #[async_trait]
    impl StepExecutor for FnExecutor {
        async fn execute(
            &self,
            step: &TemplateStep,
            kind: StepKind,
            _state: &WorkflowState,
        ) -> Result<StepOutput, StepFailure> {
            (self.0)(step, kind)
        }
    }

    fn default_output(kind: StepKind) -> StepOutput {
        match kind {
            StepKind::Validate => StepOutput::new(json!({"valid": true})),
            StepKind::Analyze => StepOutput::new(json!({
                "risks": [{"clause": "Unlimited liability", "risk_level": "high"}]
            }))
            .with_score(0.75),
            StepKind::Negotiate => StepOutput::new(json!({
                "redlines": [{"clause": "Unlimited liability", "suggestion": "Cap at fees paid"}]
            })),
            StepKind::Communicate => StepOutput::new(json!({"draft": "Summary"})),
        }
    }

    async fn engine_with<F>(script: F, templates: Vec<WorkflowTemplate>) -> (WorkflowEngine, InMemoryAuditLogger)
    where
        F: Fn(&TemplateStep, StepKind) -> Result<StepOutput, StepFailure> + Send + Sync + 'static,
    {
        let audit = InMemoryAuditLogger::new();
        let registry = Arc::new(TemplateRegistry::in_memory(Arc::new(audit.clone())));
        for template in templates {
            registry.create(template, None).await.unwrap();
        }
        let engine = WorkflowEngine::new(registry, Arc::new(FnExecutor(Box::new(script))), Arc::new(audit.clone()));
        (engine, audit)
    }

    fn full_template() -> WorkflowTemplate {
        WorkflowTemplate::new("full", "Full")
            .with_kinds(&[StepKind::Validate, StepKind::Analyze, StepKind::Negotiate, StepKind::Communicate])
            .with_retry_policy(RetryPolicy::no_retry())
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let (engine, _) = engine_with(|_, kind| Ok(default_output(kind)), vec![full_template()]).await;

        let state = engine.execute("full", WorkflowInput::new("msa.txt", "contract")).await;

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.phase, Phase::Finalized);
        assert!(state.entered(Phase::Negotiating));
        assert_eq!(state.overall_score, Some(0.75));
        assert!(state.ended_at.is_some());

        let result = state.final_result.unwrap();
        assert_eq!(result.redlines.len(), 1);
        assert_eq!(result.draft.as_deref(), Some("Summary"));
    }

    #[tokio::test]
    async fn test_missing_template_yields_failed_state() {
        let (engine, audit) = engine_with(|_, kind| Ok(default_output(kind)), vec![]).await;

        let state = engine.execute("nope", WorkflowInput::new("a", "b")).await;

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.last_error().unwrap().kind, ErrorKind::Configuration);

        let events = audit
            .query(&AuditFilter::for_execution(&state.execution_id), 10, 0)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, AuditEventType::ExecutionFailed);
    }

    #[tokio::test]
    async fn test_empty_document_fails_without_retry() {
        let (engine, _) = engine_with(|_, kind| Ok(default_output(kind)), vec![full_template().with_retry_policy(RetryPolicy::new(3))]).await;

        let state = engine.execute("full", WorkflowInput::new("empty.txt", "   ")).await;

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_error().unwrap().kind, ErrorKind::Validation);
        assert!(state.entered(Phase::ErrorRecovery));
    }

    #[tokio::test]
    async fn test_schema_error_is_not_retried() {
        let (engine, _) = engine_with(
            |_, kind| match kind {
                StepKind::Analyze => Ok(StepOutput::new(json!({"risks": [{"clause": "x", "risk_level": "extreme"}]}))),
                other => Ok(default_output(other)),
            },
            vec![full_template().with_retry_policy(RetryPolicy::new(3))],
        )
        .await;

        let state = engine.execute("full", WorkflowInput::new("a", "b")).await;

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_error().unwrap().kind, ErrorKind::Schema);
    }

    #[tokio::test]
    async fn test_optional_step_failure_becomes_warning() {
        let template = WorkflowTemplate::new("opt", "Optional")
            .with_step(TemplateStep::of_kind(StepKind::Analyze))
            .with_step(TemplateStep::new("extra", "communicate").optional())
            .with_step(TemplateStep::of_kind(StepKind::Communicate));
        let (engine, _) = engine_with(
            |step, kind| {
                if step.id == "extra" {
                    Err(StepFailure::validation("provider refused"))
                } else {
                    Ok(default_output(kind))
                }
            },
            vec![template],
        )
        .await;

        let state = engine.execute("opt", WorkflowInput::new("a", "b")).await;

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert!(state.error_history.is_empty());
        assert!(state.warnings.iter().any(|w| w.contains("extra")));
    }

    #[tokio::test]
    async fn test_validation_step_rejecting_input() {
        let (engine, _) = engine_with(
            |_, kind| match kind {
                StepKind::Validate => Ok(StepOutput::new(json!({"valid": false, "reason": "not a contract"}))),
                other => Ok(default_output(other)),
            },
            vec![full_template()],
        )
        .await;

        let state = engine.execute("full", WorkflowInput::new("a", "b")).await;

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.last_error().unwrap().message, "not a contract");
    }

    #[tokio::test]
    async fn test_recursion_limit_aborts() {
        let (engine, _) = engine_with(|_, kind| Ok(default_output(kind)), vec![full_template()]).await;

        let mut config = ExecutionConfig::default();
        config.recursion_limit = Some(2);
        let state = engine
            .execute("full", WorkflowInput::new("a", "b").with_config(config))
            .await;

        assert_eq!(state.status, ExecutionStatus::Failed);
        let last = state.last_error().unwrap();
        assert_eq!(last.kind, ErrorKind::Configuration);
        assert!(last.message.contains("recursion limit"));
    }

    #[tokio::test]
    async fn test_parallel_group_outputs_are_merged() {
        let template = WorkflowTemplate::new("par", "Parallel")
            .with_step(TemplateStep::new("legal", "analyze"))
            .with_step(TemplateStep::new("commercial", "analyze"))
            .with_step(TemplateStep::of_kind(StepKind::Communicate))
            .with_parallel_group(&["legal", "commercial"]);
        let (engine, _) = engine_with(
            |step, kind| match step.id.as_str() {
                "legal" => Ok(StepOutput::new(json!({"risks": [
                    {"clause": "Indemnity", "risk_level": "medium"}
                ]}))
                .with_score(0.5)),
                "commercial" => Ok(StepOutput::new(json!({"risks": [
                    {"clause": "Indemnity", "risk_level": "critical"},
                    {"clause": "Payment", "risk_level": "low"}
                ]}))
                .with_score(0.9)),
                _ => Ok(default_output(kind)),
            },
            vec![template],
        )
        .await;

        let state = engine.execute("par", WorkflowInput::new("a", "b")).await;

        assert_eq!(state.status, ExecutionStatus::Completed);
        let ids: Vec<_> = state.step_results.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["legal", "commercial", "communicate"]);

        let risks = state.risks();
        assert_eq!(risks.len(), 2);
        assert_eq!(risks[0]["risk_level"], "critical");
        assert_eq!(state.overall_score, Some(0.9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_failed() {
        struct SlowExecutor;

        #[async_trait]
        impl StepExecutor for SlowExecutor {
            async fn execute(
                &self,
                _step: &TemplateStep,
                kind: StepKind,
                _state: &WorkflowState,
            ) -> Result<StepOutput, StepFailure> {
                if kind == StepKind::Analyze {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                }
                Ok(default_output(kind))
            }
        }

        let audit = InMemoryAuditLogger::new();
        let registry = Arc::new(TemplateRegistry::in_memory(Arc::new(audit.clone())));
        registry
            .create(full_template().with_timeout(5), None)
            .await
            .unwrap();
        let engine = WorkflowEngine::new(registry, Arc::new(SlowExecutor), Arc::new(audit));

        let started = Instant::now();
        let state = engine.execute("full", WorkflowInput::new("a", "b")).await;

        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.last_error().unwrap().kind, ErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(6));
    }
}
