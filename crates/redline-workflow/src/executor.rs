//! Rule-based step executor
//!
//! Flags risky clauses with a keyword table so the worker can run a review end
//! to end without a model provider behind it.

use crate::classify::StepFailure;
use crate::merge::item_score;
use crate::state::WorkflowState;
use crate::step::{StepExecutor, StepKind, StepOutput, TemplateStep};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

struct RiskRule {
    clause: &'static str,
    pattern: Regex,
    risk_level: &'static str,
    suggestion: &'static str,
}

static RISK_RULES: Lazy<Vec<RiskRule>> = Lazy::new(|| {
    [
        (
            "Unlimited liability",
            r"(?i)unlimited\s+liability|liability\s+shall\s+not\s+be\s+limited",
            "critical",
            "Cap aggregate liability at the fees paid in the preceding twelve months",
        ),
        (
            "Indemnification",
            r"(?i)\bindemnif(y|ies|ication)\b",
            "high",
            "Limit indemnification to third-party claims caused by the indemnifying party's breach",
        ),
        (
            "Penalties",
            r"(?i)\bpenalt(y|ies)\b|liquidated\s+damages",
            "high",
            "Replace penalties with a service credit capped at the monthly fee",
        ),
        (
            "Non-compete",
            r"(?i)\bnon-?compete\b|shall\s+not\s+compete",
            "high",
            "Restrict the non-compete to twelve months and the services actually provided",
        ),
        (
            "Automatic renewal",
            r"(?i)\bauto(matic(ally)?)?[\s-]?renew",
            "medium",
            "Require written notice before renewal and allow termination on thirty days' notice",
        ),
        (
            "Exclusivity",
            r"(?i)\bexclusiv(e|ity)\b",
            "medium",
            "Narrow exclusivity to the defined territory and initial term",
        ),
        (
            "Termination for convenience",
            r"(?i)terminat\w*\s+for\s+convenience",
            "medium",
            "Make termination for convenience mutual with at least sixty days' notice",
        ),
        (
            "Assignment",
            r"(?i)assign\w*\s+without\s+(prior\s+)?(written\s+)?consent",
            "low",
            "Require consent for assignment except to a successor of the whole business",
        ),
    ]
    .into_iter()
    .filter_map(|(clause, pattern, risk_level, suggestion)| {
        Regex::new(pattern).ok().map(|pattern| RiskRule {
            clause,
            pattern,
            risk_level,
            suggestion,
        })
    })
    .collect()
});

static CATEGORY_HINTS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("nda", r"(?i)non-?disclosure|confidential\s+information"),
        ("employment", r"(?i)\bemployee\b|\bemployer\b|\bsalary\b"),
        ("lease", r"(?i)\blandlord\b|\btenant\b|\bpremises\b"),
        ("services", r"(?i)statement\s+of\s+work|\bservices\b"),
    ]
    .into_iter()
    .filter_map(|(category, pattern)| Regex::new(pattern).ok().map(|re| (category, re)))
    .collect()
});

static WORD: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[A-Za-z]{2,}").ok());

/// Keyword-driven implementation of every step kind
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordStepExecutor;

impl KeywordStepExecutor {
    pub fn new() -> Self {
        Self
    }

    fn validate(&self, state: &WorkflowState) -> StepOutput {
        let words = WORD
            .as_ref()
            .map_or(0, |re| re.find_iter(&state.input_document).count());
        if words == 0 {
            return StepOutput::new(json!({
                "valid": false,
                "reason": "document contains no readable text",
            }));
        }

        let category = CATEGORY_HINTS
            .iter()
            .find(|(_, re)| re.is_match(&state.input_document))
            .map(|(category, _)| *category);

        StepOutput::new(json!({
            "valid": true,
            "word_count": words,
            "category": category,
        }))
    }

    fn analyze(&self, state: &WorkflowState) -> StepOutput {
        let document = &state.input_document;
        let risks: Vec<Value> = RISK_RULES
            .iter()
            .filter_map(|rule| {
                rule.pattern.find(document).map(|m| {
                    json!({
                        "clause": rule.clause,
                        "risk_level": rule.risk_level,
                        "excerpt": excerpt(document, m.start(), m.end()),
                    })
                })
            })
            .collect();

        let overall = risks.iter().map(item_score).fold(0.0, f64::max);
        debug!(
            execution_id = %state.execution_id,
            risks = risks.len(),
            overall_score = overall,
            "Keyword analysis finished"
        );

        StepOutput::new(json!({ "risks": risks, "overall_score": overall })).with_score(overall)
    }

    fn negotiate(&self, state: &WorkflowState) -> StepOutput {
        let redlines: Vec<Value> = state
            .risks()
            .iter()
            .filter_map(|risk| {
                let clause = risk.get("clause").and_then(Value::as_str)?;
                let suggestion = RISK_RULES
                    .iter()
                    .find(|r| r.clause.eq_ignore_ascii_case(clause))
                    .map_or("Request a balanced rewrite of this clause", |r| r.suggestion);
                Some(json!({
                    "clause": clause,
                    "suggestion": suggestion,
                    "risk_score": item_score(risk),
                }))
            })
            .collect();

        StepOutput::new(json!({ "redlines": redlines }))
    }

    fn communicate(&self, state: &WorkflowState) -> StepOutput {
        let risks = state.risks();
        let mut draft = format!("Review of {}: ", state.input_name);

        if risks.is_empty() {
            draft.push_str("no risky clauses were found. The document can proceed to signature.");
        } else {
            draft.push_str(&format!(
                "{} clause(s) need attention before signature.\n",
                risks.len()
            ));
            let redlines = state
                .outputs_of(StepKind::Negotiate)
                .into_iter()
                .filter_map(|o| o.get("redlines").and_then(Value::as_array))
                .flatten()
                .cloned()
                .collect::<Vec<_>>();
            for risk in &risks {
                let clause = risk.get("clause").and_then(Value::as_str).unwrap_or("clause");
                let level = risk.get("risk_level").and_then(Value::as_str).unwrap_or("unknown");
                draft.push_str(&format!("\n- {} ({})", clause, level));
                if let Some(suggestion) = redlines
                    .iter()
                    .find(|r| r.get("clause").and_then(Value::as_str) == Some(clause))
                    .and_then(|r| r.get("suggestion").and_then(Value::as_str))
                {
                    draft.push_str(&format!(": {}", suggestion));
                }
            }
        }

        StepOutput::new(json!({ "draft": draft, "risk_count": risks.len() }))
    }
}

fn excerpt(document: &str, start: usize, end: usize) -> String {
    const CONTEXT: usize = 40;
    let mut from = start.saturating_sub(CONTEXT);
    while !document.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT).min(document.len());
    while !document.is_char_boundary(to) {
        to += 1;
    }
    document[from..to].split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl StepExecutor for KeywordStepExecutor {
    async fn execute(
        &self,
        step: &TemplateStep,
        kind: StepKind,
        state: &WorkflowState,
    ) -> Result<StepOutput, StepFailure> {
        let output = match kind {
            StepKind::Validate => self.validate(state),
            StepKind::Analyze => self.analyze(state),
            StepKind::Negotiate => self.negotiate(state),
            StepKind::Communicate => self.communicate(state),
        };

        if state.config.uses_ai_for(kind) {
            return Ok(output.with_warning(format!(
                "no model provider configured, '{}' ran rule-based",
                step.id
            )));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ExecutionConfig, StepResult};
    use chrono::Utc;

    const RISKY: &str = "The Supplier shall indemnify the Customer. This agreement will \
        automatically renew each year. Supplier accepts unlimited liability for data loss.";

    fn state(document: &str) -> WorkflowState {
        WorkflowState::new("exec", "standard_review", document, "msa.txt", ExecutionConfig::default())
    }

    async fn run(kind: StepKind, state: &WorkflowState) -> StepOutput {
        KeywordStepExecutor::new()
            .execute(&TemplateStep::of_kind(kind), kind, state)
            .await
            .unwrap()
    }

    fn with_result(mut state: WorkflowState, kind: StepKind, output: Value) -> WorkflowState {
        state.step_results.push(StepResult {
            step_id: kind.as_str().to_string(),
            step_name: kind.as_str().to_string(),
            kind,
            output,
            score: None,
            succeeded: true,
            attempt: 0,
            duration_ms: 0,
            completed_at: Utc::now(),
        });
        state
    }

    #[tokio::test]
    async fn test_analysis_flags_keywords() {
        let output = run(StepKind::Analyze, &state(RISKY)).await;

        let risks = output.payload["risks"].as_array().unwrap();
        let clauses: Vec<_> = risks.iter().map(|r| r["clause"].as_str().unwrap()).collect();
        assert_eq!(clauses, vec!["Unlimited liability", "Indemnification", "Automatic renewal"]);
        assert_eq!(output.score, Some(1.0));
        assert!(crate::schema::validate_output(StepKind::Analyze, &output.payload).is_ok());
    }

    #[tokio::test]
    async fn test_clean_document_has_no_risks() {
        let output = run(StepKind::Analyze, &state("Both parties agree to meet monthly.")).await;
        assert!(output.payload["risks"].as_array().unwrap().is_empty());
        assert_eq!(output.score, Some(0.0));
    }

    #[tokio::test]
    async fn test_validation() {
        let ok = run(StepKind::Validate, &state("Confidential Information shall be protected.")).await;
        assert_eq!(ok.payload["valid"], true);
        assert_eq!(ok.payload["category"], "nda");

        let rejected = run(StepKind::Validate, &state("1234 5678 !!")).await;
        assert_eq!(rejected.payload["valid"], false);
    }

    #[tokio::test]
    async fn test_negotiation_and_draft_follow_analysis() {
        let analysis = run(StepKind::Analyze, &state(RISKY)).await;
        let analyzed = with_result(state(RISKY), StepKind::Analyze, analysis.payload);

        let negotiation = run(StepKind::Negotiate, &analyzed).await;
        let redlines = negotiation.payload["redlines"].as_array().unwrap();
        assert_eq!(redlines.len(), 3);
        assert!(crate::schema::validate_output(StepKind::Negotiate, &negotiation.payload).is_ok());

        let negotiated = with_result(analyzed, StepKind::Negotiate, negotiation.payload);
        let draft = run(StepKind::Communicate, &negotiated).await;
        let text = draft.payload["draft"].as_str().unwrap();
        assert!(text.contains("3 clause(s)"));
        assert!(text.contains("Cap aggregate liability"));
    }

    #[tokio::test]
    async fn test_ai_request_adds_warning() {
        let mut config = ExecutionConfig::default();
        config.use_ai_for_step.insert("analyze".to_string(), true);
        let state = WorkflowState::new("e", "t", RISKY, "msa.txt", config);

        let output = run(StepKind::Analyze, &state).await;
        assert_eq!(output.warnings.len(), 1);
    }
}
