//! Conditional branching rules
//!
//! Evaluation is a pure function of the execution state and config. Every rule
//! whose condition holds contributes its action, in declaration order.

use crate::merge;
use crate::state::{ExecutionConfig, WorkflowState};
use crate::step::StepKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of condition a rule checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    ScoreThreshold,
    DocumentCategory,
    DocumentSize,
    ExecutionPreference,
    Custom,
}

/// Comparison operator for score thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

/// Condition parameters, tagged by condition type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchCondition {
    /// Compare the aggregate score; false while no score exists
    ScoreThreshold { operator: Comparison, threshold: f64 },
    /// Case-insensitive match on the configured document category
    DocumentCategory { categories: BTreeSet<String> },
    /// Document length in bytes within the inclusive bounds
    DocumentSize {
        #[serde(default)]
        min_bytes: Option<usize>,
        #[serde(default)]
        max_bytes: Option<usize>,
    },
    /// Match on the caller's execution preference
    ExecutionPreference { preference: String },
    /// JSON pointer into the evaluation context; without `equals` the value
    /// must exist and be truthy
    Custom {
        pointer: String,
        #[serde(default)]
        equals: Option<Value>,
    },
}

impl BranchCondition {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            BranchCondition::ScoreThreshold { .. } => ConditionType::ScoreThreshold,
            BranchCondition::DocumentCategory { .. } => ConditionType::DocumentCategory,
            BranchCondition::DocumentSize { .. } => ConditionType::DocumentSize,
            BranchCondition::ExecutionPreference { .. } => ConditionType::ExecutionPreference,
            BranchCondition::Custom { .. } => ConditionType::Custom,
        }
    }

    fn holds(&self, state: &WorkflowState, config: &ExecutionConfig) -> bool {
        match self {
            BranchCondition::ScoreThreshold {
                operator,
                threshold,
            } => state
                .overall_score
                .map(|score| operator.holds(score, *threshold))
                .unwrap_or(false),
            BranchCondition::DocumentCategory { categories } => config
                .document_category
                .as_deref()
                .map(|category| {
                    categories
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(category))
                })
                .unwrap_or(false),
            BranchCondition::DocumentSize {
                min_bytes,
                max_bytes,
            } => {
                let size = state.input_document.len();
                min_bytes.map_or(true, |min| size >= min) && max_bytes.map_or(true, |max| size <= max)
            }
            BranchCondition::ExecutionPreference { preference } => config
                .preference
                .as_deref()
                .map(|p| p.eq_ignore_ascii_case(preference))
                .unwrap_or(false),
            BranchCondition::Custom { pointer, equals } => {
                let context = evaluation_context(state, config);
                match (context.pointer(pointer), equals) {
                    (Some(found), Some(expected)) => found == expected,
                    (Some(found), None) => is_truthy(found),
                    (None, _) => false,
                }
            }
        }
    }
}

impl fmt::Display for BranchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchCondition::ScoreThreshold {
                operator,
                threshold,
            } => write!(f, "score {} {}", operator.symbol(), threshold),
            BranchCondition::DocumentCategory { categories } => {
                let list: Vec<&str> = categories.iter().map(String::as_str).collect();
                write!(f, "category in [{}]", list.join(", "))
            }
            BranchCondition::DocumentSize {
                min_bytes,
                max_bytes,
            } => write!(
                f,
                "size in [{}, {}]",
                min_bytes.map_or("0".to_string(), |m| m.to_string()),
                max_bytes.map_or("inf".to_string(), |m| m.to_string())
            ),
            BranchCondition::ExecutionPreference { preference } => {
                write!(f, "preference = {}", preference)
            }
            BranchCondition::Custom { pointer, equals } => match equals {
                Some(value) => write!(f, "{} = {}", pointer, value),
                None => write!(f, "{} is set", pointer),
            },
        }
    }
}

/// Context exposed to custom rule pointers
fn evaluation_context(state: &WorkflowState, config: &ExecutionConfig) -> Value {
    let analyses: Vec<Value> = state
        .outputs_of(StepKind::Analyze)
        .into_iter()
        .cloned()
        .collect();

    json!({
        "config": Value::Object(config.extra.clone()),
        "score": state.overall_score,
        "analysis": merge::merge_outputs(StepKind::Analyze, &analyses),
        "input": {
            "name": state.input_name,
            "size": state.input_document.len(),
        },
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Steps a matching rule adds or removes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchAction {
    #[serde(default)]
    pub skip_steps: BTreeSet<String>,
    #[serde(default)]
    pub add_steps: BTreeSet<String>,
}

impl BranchAction {
    pub fn skip(steps: &[&str]) -> Self {
        Self {
            skip_steps: steps.iter().map(|s| s.to_string()).collect(),
            add_steps: BTreeSet::new(),
        }
    }

    pub fn add(steps: &[&str]) -> Self {
        Self {
            skip_steps: BTreeSet::new(),
            add_steps: steps.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A condition/action pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRule {
    pub name: String,
    pub condition: BranchCondition,
    pub action: BranchAction,
}

impl BranchRule {
    pub fn new(name: &str, condition: BranchCondition, action: BranchAction) -> Self {
        Self {
            name: name.to_string(),
            condition,
            action,
        }
    }

    pub fn condition_type(&self) -> ConditionType {
        self.condition.condition_type()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.action.skip_steps.is_empty() {
            let list: Vec<&str> = self.action.skip_steps.iter().map(String::as_str).collect();
            parts.push(format!("skip {}", list.join(",")));
        }
        if !self.action.add_steps.is_empty() {
            let list: Vec<&str> = self.action.add_steps.iter().map(String::as_str).collect();
            parts.push(format!("add {}", list.join(",")));
        }
        format!("{}: when {} then {}", self.name, self.condition, parts.join("; "))
    }
}

/// Combined effect of all matching rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub steps_to_add: BTreeSet<String>,
    pub steps_to_skip: BTreeSet<String>,
    pub applied_rules: Vec<String>,
}

impl BranchDecision {
    pub fn is_empty(&self) -> bool {
        self.steps_to_add.is_empty() && self.steps_to_skip.is_empty()
    }
}

/// Evaluate rules in declaration order without short-circuiting
///
/// The last rule touching a step decides whether it is skipped or added. Within
/// one rule an add beats a skip of the same step.
pub fn evaluate(
    rules: &[BranchRule],
    state: &WorkflowState,
    config: &ExecutionConfig,
) -> BranchDecision {
    let mut decision = BranchDecision::default();

    for rule in rules.iter().filter(|r| r.condition.holds(state, config)) {
        for step in &rule.action.skip_steps {
            decision.steps_to_add.remove(step);
            decision.steps_to_skip.insert(step.clone());
        }
        for step in &rule.action.add_steps {
            decision.steps_to_skip.remove(step);
            decision.steps_to_add.insert(step.clone());
        }
        decision.applied_rules.push(rule.describe());
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(document: &str, score: Option<f64>) -> WorkflowState {
        let mut state = WorkflowState::new("e", "t", document, "doc.txt", ExecutionConfig::default());
        state.overall_score = score;
        state
    }

    fn score_rule(name: &str, threshold: f64, action: BranchAction) -> BranchRule {
        BranchRule::new(
            name,
            BranchCondition::ScoreThreshold {
                operator: Comparison::Gte,
                threshold,
            },
            action,
        )
    }

    #[test]
    fn test_later_add_beats_earlier_skip() {
        let rules = vec![
            score_rule("a", 0.1, BranchAction::skip(&["negotiate"])),
            score_rule("b", 0.2, BranchAction::add(&["negotiate"])),
        ];
        let state = state_with("text", Some(0.9));

        let decision = evaluate(&rules, &state, &state.config);

        assert!(decision.steps_to_add.contains("negotiate"));
        assert!(!decision.steps_to_skip.contains("negotiate"));
        assert_eq!(decision.applied_rules.len(), 2);
    }

    #[test]
    fn test_add_wins_within_one_rule() {
        let action = BranchAction {
            skip_steps: ["negotiate".to_string()].into_iter().collect(),
            add_steps: ["negotiate".to_string()].into_iter().collect(),
        };
        let rules = vec![score_rule("both", 0.0, action)];
        let state = state_with("text", Some(0.5));

        let decision = evaluate(&rules, &state, &state.config);
        assert!(decision.steps_to_add.contains("negotiate"));
        assert!(decision.steps_to_skip.is_empty());
    }

    #[test]
    fn test_no_short_circuit_and_non_matching_ignored() {
        let rules = vec![
            score_rule("high", 0.8, BranchAction::add(&["negotiate"])),
            score_rule("low", 0.1, BranchAction::skip(&["communicate"])),
            score_rule("never", 2.0, BranchAction::skip(&["analyze"])),
        ];
        let state = state_with("text", Some(0.85));

        let decision = evaluate(&rules, &state, &state.config);
        assert_eq!(decision.steps_to_add.len(), 1);
        assert_eq!(decision.steps_to_skip.len(), 1);
        assert!(!decision.steps_to_skip.contains("analyze"));
    }

    #[test]
    fn test_score_rule_without_score_is_false() {
        let rules = vec![score_rule("high", 0.0, BranchAction::add(&["negotiate"]))];
        let state = state_with("text", None);
        assert!(evaluate(&rules, &state, &state.config).is_empty());
    }

    #[test]
    fn test_category_size_and_preference() {
        let config = ExecutionConfig::default()
            .with_category("NDA")
            .with_preference("fast");
        let state = state_with(&"x".repeat(100), None);

        let rules = vec![
            BranchRule::new(
                "nda",
                BranchCondition::DocumentCategory {
                    categories: ["nda".to_string()].into_iter().collect(),
                },
                BranchAction::skip(&["negotiate"]),
            ),
            BranchRule::new(
                "small",
                BranchCondition::DocumentSize {
                    min_bytes: None,
                    max_bytes: Some(50),
                },
                BranchAction::add(&["x"]),
            ),
            BranchRule::new(
                "fast",
                BranchCondition::ExecutionPreference {
                    preference: "FAST".to_string(),
                },
                BranchAction::skip(&["communicate"]),
            ),
        ];

        let decision = evaluate(&rules, &state, &config);
        assert_eq!(decision.applied_rules.len(), 2);
        assert!(decision.steps_to_skip.contains("negotiate"));
        assert!(decision.steps_to_skip.contains("communicate"));
        assert!(decision.steps_to_add.is_empty());
    }

    #[test]
    fn test_custom_pointer_rule() {
        let config = ExecutionConfig::default().with_extra("jurisdiction", json!("DE"));
        let state = state_with("text", None);

        let rules = vec![BranchRule::new(
            "german",
            BranchCondition::Custom {
                pointer: "/config/jurisdiction".to_string(),
                equals: Some(json!("DE")),
            },
            BranchAction::add(&["negotiate"]),
        )];

        assert!(!evaluate(&rules, &state, &config).is_empty());
        assert!(evaluate(&rules, &state, &ExecutionConfig::default()).is_empty());
    }

    #[test]
    fn test_condition_serde_shape() {
        let rule: BranchRule = serde_json::from_value(json!({
            "name": "escalate",
            "condition": {"type": "score_threshold", "operator": "gt", "threshold": 0.7},
            "action": {"add_steps": ["negotiate"]}
        }))
        .unwrap();

        assert_eq!(rule.condition_type(), ConditionType::ScoreThreshold);
        assert!(rule.describe().contains("score > 0.7"));
    }
}
