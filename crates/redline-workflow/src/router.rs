//! Execution plan and pure routing between engine phases
//!
//! The engine owns all side effects; everything here is a function of the plan
//! and the facts the engine hands in.

use crate::branching::BranchDecision;
use crate::classify::ClassifiedError;
use crate::state::Phase;
use crate::step::{StepKind, TemplateStep};
use crate::templates::WorkflowTemplate;
use crate::{Result, WorkflowError};

/// A step scheduled for one execution
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub step: TemplateStep,
    pub kind: StepKind,
    /// Index of the parallel group the step belongs to
    pub group: Option<usize>,
}

/// Steps an execution will run, after branching adjustments
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    declared: Vec<PlannedStep>,
    active: Vec<PlannedStep>,
}

impl ExecutionPlan {
    pub fn from_template(template: &WorkflowTemplate) -> Result<Self> {
        let mut declared = Vec::with_capacity(template.steps.len());
        for step in &template.steps {
            let kind = step.kind().map_err(|e| {
                WorkflowError::Configuration(format!(
                    "template '{}' step '{}': {}",
                    template.id, step.id, e
                ))
            })?;
            let group = template
                .parallel_groups
                .iter()
                .position(|g| g.iter().any(|id| *id == step.id));
            declared.push(PlannedStep {
                step: step.clone(),
                kind,
                group,
            });
        }

        Ok(Self {
            active: declared.clone(),
            declared,
        })
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.active
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.active.iter().map(|p| p.step.id.as_str()).collect()
    }

    pub fn has_steps(&self, phase: Phase) -> bool {
        phase
            .step_kind()
            .map_or(false, |kind| self.active.iter().any(|p| p.kind == kind))
    }

    /// Steps of one phase in execution batches
    ///
    /// Members of a parallel group form one batch positioned at the first
    /// member; every other step is a batch of its own.
    pub fn batches(&self, phase: Phase) -> Vec<Vec<&PlannedStep>> {
        let Some(kind) = phase.step_kind() else {
            return Vec::new();
        };

        let steps: Vec<&PlannedStep> = self.active.iter().filter(|p| p.kind == kind).collect();
        let mut emitted_groups = Vec::new();
        let mut batches = Vec::new();

        for planned in &steps {
            match planned.group {
                Some(group) if emitted_groups.contains(&group) => {}
                Some(group) => {
                    emitted_groups.push(group);
                    batches.push(
                        steps
                            .iter()
                            .copied()
                            .filter(|p| p.group == Some(group))
                            .collect(),
                    );
                }
                None => batches.push(vec![*planned]),
            }
        }

        batches
    }

    /// Apply a branching decision; returns warnings for ignored actions
    ///
    /// Names match step IDs first, then step kinds. Required steps are never
    /// skipped. Added names that are not declared are synthesised when they
    /// name a step kind. `completed` is the last phase that already ran.
    pub fn apply(&mut self, decision: &BranchDecision, completed: Phase) -> Vec<String> {
        let mut warnings = Vec::new();

        for name in &decision.steps_to_skip {
            let targets: Vec<String> = self
                .matching(name)
                .map(|p| p.step.id.clone())
                .collect();
            if targets.is_empty() {
                continue;
            }
            for id in targets {
                let required = self
                    .active
                    .iter()
                    .any(|p| p.step.id == id && p.step.required);
                if required {
                    warnings.push(format!("skip of required step '{}' ignored", id));
                } else {
                    self.active.retain(|p| p.step.id != id);
                }
            }
        }

        for name in &decision.steps_to_add {
            if self.active.iter().any(|p| p.step.id == *name) {
                continue;
            }

            let planned = match self.declared.iter().find(|p| p.step.id == *name) {
                Some(declared) => declared.clone(),
                None => match name.parse::<StepKind>() {
                    Ok(kind) => PlannedStep {
                        step: TemplateStep::new(name, kind.as_str()),
                        kind,
                        group: None,
                    },
                    Err(_) => {
                        warnings.push(format!("added step '{}' names no step kind", name));
                        continue;
                    }
                },
            };

            if phase_index(planned.kind.phase()) <= phase_index(completed) {
                warnings.push(format!(
                    "added step '{}' belongs to a phase that already ran",
                    name
                ));
                continue;
            }

            self.insert_in_declared_order(planned);
        }

        warnings
    }

    fn matching<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PlannedStep> + 'a {
        let by_id = self.active.iter().any(|p| p.step.id == name);
        let kind = name.parse::<StepKind>().ok();
        self.active.iter().filter(move |p| {
            if by_id {
                p.step.id == name
            } else {
                Some(p.kind) == kind
            }
        })
    }

    fn insert_in_declared_order(&mut self, planned: PlannedStep) {
        let declared_pos = |id: &str| self.declared.iter().position(|p| p.step.id == id);
        let Some(target) = declared_pos(&planned.step.id) else {
            self.active.push(planned);
            return;
        };
        let at = self
            .active
            .iter()
            .position(|p| declared_pos(&p.step.id).map_or(true, |pos| pos > target))
            .unwrap_or(self.active.len());
        self.active.insert(at, planned);
    }
}

fn phase_index(phase: Phase) -> usize {
    Phase::WORK_ORDER
        .iter()
        .position(|p| *p == phase)
        .unwrap_or(usize::MAX)
}

/// First work phase after `after` that has planned steps, else Finalized
pub fn next_work_phase(plan: &ExecutionPlan, after: Phase) -> Phase {
    let start = phase_index(after).saturating_add(1);
    Phase::WORK_ORDER
        .iter()
        .skip(start)
        .copied()
        .find(|p| plan.has_steps(*p))
        .unwrap_or(Phase::Finalized)
}

/// Successor of a work phase that completed without error
///
/// An analysis reporting no risks skips negotiation.
pub fn route_success(phase: Phase, plan: &ExecutionPlan, no_risks: bool) -> Phase {
    if phase == Phase::Analyzing && no_risks {
        return next_work_phase(plan, Phase::Negotiating);
    }
    next_work_phase(plan, phase)
}

/// Verdict reached in ErrorRecovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Re-enter the failed phase
    Retry(Phase),
    GiveUp,
}

pub fn recover(
    error: &ClassifiedError,
    retry_count: u32,
    max_retries: u32,
    failed_phase: Option<Phase>,
) -> RecoveryDecision {
    match failed_phase {
        Some(phase) if error.is_retryable() && retry_count < max_retries => {
            RecoveryDecision::Retry(phase)
        }
        _ => RecoveryDecision::GiveUp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;

    fn template() -> WorkflowTemplate {
        WorkflowTemplate::new("t", "T")
            .with_step(TemplateStep::of_kind(StepKind::Validate))
            .with_step(TemplateStep::new("legal", "analyze"))
            .with_step(TemplateStep::new("commercial", "analyze"))
            .with_step(TemplateStep::new("tax", "analyze"))
            .with_step(TemplateStep::of_kind(StepKind::Negotiate).optional())
            .with_step(TemplateStep::of_kind(StepKind::Communicate))
            .with_parallel_group(&["legal", "commercial"])
    }

    fn decision(skip: &[&str], add: &[&str]) -> BranchDecision {
        BranchDecision {
            steps_to_skip: skip.iter().map(|s| s.to_string()).collect(),
            steps_to_add: add.iter().map(|s| s.to_string()).collect(),
            applied_rules: Vec::new(),
        }
    }

    #[test]
    fn test_batches_group_parallel_steps() {
        let plan = ExecutionPlan::from_template(&template()).unwrap();
        let batches = plan.batches(Phase::Analyzing);

        assert_eq!(batches.len(), 2);
        let first: Vec<_> = batches[0].iter().map(|p| p.step.id.as_str()).collect();
        assert_eq!(first, vec!["legal", "commercial"]);
        assert_eq!(batches[1][0].step.id, "tax");
        assert!(plan.batches(Phase::Finalized).is_empty());
    }

    #[test]
    fn test_routing_skips_negotiation_without_risks() {
        let plan = ExecutionPlan::from_template(&template()).unwrap();

        assert_eq!(route_success(Phase::ValidatingInput, &plan, false), Phase::Analyzing);
        assert_eq!(route_success(Phase::Analyzing, &plan, true), Phase::Communicating);
        assert_eq!(route_success(Phase::Analyzing, &plan, false), Phase::Negotiating);
        assert_eq!(route_success(Phase::Communicating, &plan, false), Phase::Finalized);
    }

    #[test]
    fn test_routing_skips_phases_without_steps() {
        let template = WorkflowTemplate::new("a", "A").with_kinds(&[StepKind::Analyze]);
        let plan = ExecutionPlan::from_template(&template).unwrap();

        assert_eq!(next_work_phase(&plan, Phase::ValidatingInput), Phase::Analyzing);
        assert_eq!(route_success(Phase::Analyzing, &plan, false), Phase::Finalized);
    }

    #[test]
    fn test_skip_respects_required() {
        let mut plan = ExecutionPlan::from_template(&template()).unwrap();
        let warnings = plan.apply(&decision(&["negotiate", "communicate"], &[]), Phase::Analyzing);

        assert!(!plan.has_steps(Phase::Negotiating));
        assert!(plan.has_steps(Phase::Communicating));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_add_restores_declared_order_and_synthesises() {
        let mut plan = ExecutionPlan::from_template(&template()).unwrap();
        plan.apply(&decision(&["negotiate"], &[]), Phase::Analyzing);
        let warnings = plan.apply(&decision(&[], &["negotiate", "analysis", "bogus"]), Phase::Analyzing);

        let ids = plan.step_ids();
        assert_eq!(ids, vec!["validate", "legal", "commercial", "tax", "negotiate", "communicate"]);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_recovery_decision() {
        let transient = ClassifiedError::new(ErrorKind::TransientExecution, "analyze", "timeout");
        let schema = ClassifiedError::new(ErrorKind::Schema, "analyze", "missing risks");

        assert_eq!(
            recover(&transient, 0, 3, Some(Phase::Analyzing)),
            RecoveryDecision::Retry(Phase::Analyzing)
        );
        assert_eq!(recover(&transient, 3, 3, Some(Phase::Analyzing)), RecoveryDecision::GiveUp);
        assert_eq!(recover(&schema, 0, 3, Some(Phase::Analyzing)), RecoveryDecision::GiveUp);
        assert_eq!(recover(&transient, 0, 3, None), RecoveryDecision::GiveUp);
    }
}
