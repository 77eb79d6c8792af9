//! Workflow steps and the step executor capability

use crate::classify::StepFailure;
use crate::state::{Phase, WorkflowState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The unit of work a step performs; each kind is driven by one engine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Validate,
    Analyze,
    Negotiate,
    Communicate,
}

impl StepKind {
    pub const ALL: [StepKind; 4] = [
        StepKind::Validate,
        StepKind::Analyze,
        StepKind::Negotiate,
        StepKind::Communicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Validate => "validate",
            StepKind::Analyze => "analyze",
            StepKind::Negotiate => "negotiate",
            StepKind::Communicate => "communicate",
        }
    }

    /// Engine phase that executes steps of this kind
    pub fn phase(&self) -> Phase {
        match self {
            StepKind::Validate => Phase::ValidatingInput,
            StepKind::Analyze => Phase::Analyzing,
            StepKind::Negotiate => Phase::Negotiating,
            StepKind::Communicate => Phase::Communicating,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validate" | "validation" => Ok(StepKind::Validate),
            "analyze" | "analyse" | "analysis" => Ok(StepKind::Analyze),
            "negotiate" | "negotiation" => Ok(StepKind::Negotiate),
            "communicate" | "communication" => Ok(StepKind::Communicate),
            other => Err(format!("unknown step kind: {}", other)),
        }
    }
}

/// A step declared by a workflow template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateStep {
    /// Unique step ID within the template
    pub id: String,
    /// Step name; resolves to a [`StepKind`]
    pub name: String,
    /// Required steps cannot be skipped and abort their phase on failure
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl TemplateStep {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            required: true,
        }
    }

    /// A step whose ID is its name
    pub fn of_kind(kind: StepKind) -> Self {
        Self::new(kind.as_str(), kind.as_str())
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn kind(&self) -> Result<StepKind, String> {
        self.name.parse()
    }
}

/// What a step executor hands back to the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Step payload, checked against the step kind's schema
    pub payload: serde_json::Value,
    /// Aggregate score contributed by this step
    pub score: Option<f64>,
    /// Non-fatal observations
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl StepOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            score: None,
            warnings: Vec::new(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Performs the actual work of one named step
///
/// Implementations receive a read-only view of the execution state; the engine
/// owns every mutation and applies the returned output itself.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &TemplateStep,
        kind: StepKind,
        state: &WorkflowState,
    ) -> Result<StepOutput, StepFailure>;
}
