//! Versioned workflow templates
//!
//! Templates are immutable once published. Publishing a change creates a new
//! version; deactivation is soft so historical executions stay traceable.
//! Built-in templates are seeded at startup and cannot be modified.

use crate::backoff::{BackoffStrategy, RetryPolicy};
use crate::branching::{BranchAction, BranchCondition, BranchRule, Comparison};
use crate::step::{StepKind, TemplateStep};
use crate::{Result, WorkflowError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redline_audit::{AuditEvent, AuditEventType, AuditLogger};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Named, versioned workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub steps: Vec<TemplateStep>,
    #[serde(default)]
    pub branching_rules: Vec<BranchRule>,
    /// Groups of step IDs executed concurrently
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub compliance_tags: BTreeSet<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl WorkflowTemplate {
    pub fn new(id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: default_category(),
            steps: Vec::new(),
            branching_rules: Vec::new(),
            parallel_groups: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            retry_policy: RetryPolicy::default(),
            compliance_tags: BTreeSet::new(),
            version: 1,
            is_builtin: false,
            is_active: true,
            author: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_step(mut self, step: TemplateStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append one required step per kind, each named after its kind
    pub fn with_kinds(mut self, kinds: &[StepKind]) -> Self {
        self.steps.extend(kinds.iter().map(|k| TemplateStep::of_kind(*k)));
        self
    }

    pub fn with_rule(mut self, rule: BranchRule) -> Self {
        self.branching_rules.push(rule);
        self
    }

    pub fn with_parallel_group(mut self, step_ids: &[&str]) -> Self {
        self.parallel_groups
            .push(step_ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compliance_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn step(&self, id: &str) -> Option<&TemplateStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Structural checks run before a template is stored
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(WorkflowError::InvalidDefinition(msg)) };

        if self.id.trim().is_empty() {
            return invalid("template id must not be empty".to_string());
        }
        if self.steps.is_empty() {
            return invalid(format!("template '{}' declares no steps", self.id));
        }
        if self.timeout_seconds == 0 {
            return invalid(format!("template '{}' has a zero timeout", self.id));
        }
        if let Err(e) = self.retry_policy.backoff.validate() {
            return invalid(format!("template '{}': {}", self.id, e));
        }

        let mut kinds: HashMap<&str, StepKind> = HashMap::new();
        for step in &self.steps {
            let kind = step.kind().map_err(|e| {
                WorkflowError::InvalidDefinition(format!("step '{}': {}", step.id, e))
            })?;
            if kinds.insert(step.id.as_str(), kind).is_some() {
                return invalid(format!("duplicate step id '{}'", step.id));
            }
        }

        let mut grouped: HashSet<&str> = HashSet::new();
        for group in &self.parallel_groups {
            if group.len() < 2 {
                return invalid("parallel groups need at least two steps".to_string());
            }
            let mut group_kind = None;
            for id in group {
                let Some(kind) = kinds.get(id.as_str()) else {
                    return invalid(format!("parallel group names unknown step '{}'", id));
                };
                if !grouped.insert(id.as_str()) {
                    return invalid(format!("step '{}' appears in more than one parallel group", id));
                }
                match group_kind {
                    None => group_kind = Some(*kind),
                    Some(k) if k != *kind => {
                        return invalid(format!(
                            "parallel group mixes {} and {} steps",
                            k, kind
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        for rule in &self.branching_rules {
            for name in rule.action.skip_steps.iter().chain(&rule.action.add_steps) {
                if !kinds.contains_key(name.as_str()) && name.parse::<StepKind>().is_err() {
                    return invalid(format!(
                        "rule '{}' references unknown step '{}'",
                        rule.name, name
                    ));
                }
            }

            // Skips resolve by step ID first, then by kind
            for name in &rule.action.skip_steps {
                let targets: Vec<&TemplateStep> = if kinds.contains_key(name.as_str()) {
                    self.steps.iter().filter(|s| s.id == *name).collect()
                } else {
                    let kind = name.parse::<StepKind>().ok();
                    self.steps
                        .iter()
                        .filter(|s| s.kind().ok() == kind)
                        .collect()
                };
                if !targets.is_empty() && targets.iter().all(|s| s.required) {
                    return invalid(format!(
                        "rule '{}' skips '{}' but no matching step is optional",
                        rule.name, name
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Filter for listing templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateFilter {
    pub category: Option<String>,
    pub tag: Option<String>,
    /// Case-insensitive match on id, name or description
    pub search: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
    #[serde(default)]
    pub builtin_only: bool,
}

impl TemplateFilter {
    pub fn matches(&self, template: &WorkflowTemplate) -> bool {
        if !self.include_inactive && !template.is_active {
            return false;
        }
        if self.builtin_only && !template.is_builtin {
            return false;
        }
        if let Some(ref category) = self.category {
            if !template.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !template.compliance_tags.contains(tag) {
                return false;
            }
        }
        if let Some(ref search) = self.search {
            let query = search.to_lowercase();
            return template.id.to_lowercase().contains(&query)
                || template.name.to_lowercase().contains(&query)
                || template.description.to_lowercase().contains(&query);
        }
        true
    }
}

/// Template storage keyed by (id, version)
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn save(&self, template: &WorkflowTemplate) -> Result<()>;
    async fn get_version(&self, id: &str, version: u32) -> Result<Option<WorkflowTemplate>>;
    /// Highest stored version, active or not
    async fn latest(&self, id: &str) -> Result<Option<WorkflowTemplate>>;
    async fn versions(&self, id: &str) -> Result<Vec<WorkflowTemplate>>;
    /// Latest version of every template
    async fn list(&self) -> Result<Vec<WorkflowTemplate>>;
    async fn set_active(&self, id: &str, active: bool) -> Result<()>;
}

/// In-memory template repository
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<String, BTreeMap<u32, WorkflowTemplate>>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTemplateRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn save(&self, template: &WorkflowTemplate) -> Result<()> {
        let mut templates = self.templates.write().await;
        templates
            .entry(template.id.clone())
            .or_default()
            .insert(template.version, template.clone());
        Ok(())
    }

    async fn get_version(&self, id: &str, version: u32) -> Result<Option<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates.get(id).and_then(|v| v.get(&version)).cloned())
    }

    async fn latest(&self, id: &str) -> Result<Option<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates
            .get(id)
            .and_then(|v| v.values().next_back())
            .cloned())
    }

    async fn versions(&self, id: &str) -> Result<Vec<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates
            .get(id)
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list(&self) -> Result<Vec<WorkflowTemplate>> {
        let templates = self.templates.read().await;
        let mut list: Vec<_> = templates
            .values()
            .filter_map(|v| v.values().next_back().cloned())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let mut templates = self.templates.write().await;
        let versions = templates
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(format!("template {}", id)))?;
        for template in versions.values_mut() {
            template.is_active = active;
            template.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Template registry service
pub struct TemplateRegistry {
    repository: Arc<dyn TemplateRepository>,
    audit: Arc<dyn AuditLogger>,
}

impl TemplateRegistry {
    pub fn new(repository: Arc<dyn TemplateRepository>, audit: Arc<dyn AuditLogger>) -> Self {
        Self { repository, audit }
    }

    pub fn in_memory(audit: Arc<dyn AuditLogger>) -> Self {
        Self::new(Arc::new(InMemoryTemplateRepository::new()), audit)
    }

    /// Store the built-in templates; existing entries are left untouched
    pub async fn seed_builtins(&self) -> Result<usize> {
        let mut seeded = 0;
        for template in builtin_templates() {
            if self.repository.latest(&template.id).await?.is_some() {
                continue;
            }
            template.validate()?;
            self.repository.save(&template).await?;
            seeded += 1;
        }

        info!(count = seeded, "Seeded built-in workflow templates");
        Ok(seeded)
    }

    /// Create a user template at version 1
    pub async fn create(
        &self,
        mut template: WorkflowTemplate,
        actor_id: Option<&str>,
    ) -> Result<WorkflowTemplate> {
        template.validate()?;

        if self.repository.latest(&template.id).await?.is_some() {
            return Err(WorkflowError::Configuration(format!(
                "template '{}' already exists",
                template.id
            )));
        }

        let now = Utc::now();
        template.version = 1;
        template.is_builtin = false;
        template.is_active = true;
        template.created_at = now;
        template.updated_at = now;
        if template.author.is_none() {
            template.author = actor_id.map(str::to_string);
        }

        self.repository.save(&template).await?;
        self.record(AuditEventType::TemplateCreated, &template, actor_id)
            .await?;

        info!(
            template_id = %template.id,
            name = %template.name,
            steps = template.steps.len(),
            "Created workflow template"
        );

        Ok(template)
    }

    /// Publish a new immutable version of an existing user template
    pub async fn publish_version(
        &self,
        mut template: WorkflowTemplate,
        actor_id: Option<&str>,
    ) -> Result<WorkflowTemplate> {
        template.validate()?;

        let latest = self
            .repository
            .latest(&template.id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("template {}", template.id)))?;

        if latest.is_builtin {
            return Err(WorkflowError::Configuration(format!(
                "built-in template '{}' is read-only",
                template.id
            )));
        }

        template.version = latest.version + 1;
        template.is_builtin = false;
        template.is_active = latest.is_active;
        template.created_at = latest.created_at;
        template.updated_at = Utc::now();

        self.repository.save(&template).await?;
        self.record(AuditEventType::TemplateVersionPublished, &template, actor_id)
            .await?;

        info!(
            template_id = %template.id,
            version = template.version,
            "Published workflow template version"
        );

        Ok(template)
    }

    /// Latest active version
    pub async fn get(&self, id: &str) -> Result<WorkflowTemplate> {
        match self.repository.latest(id).await? {
            Some(template) if template.is_active => Ok(template),
            _ => Err(WorkflowError::NotFound(format!("template {}", id))),
        }
    }

    /// A specific version, including deactivated ones
    pub async fn get_version(&self, id: &str, version: u32) -> Result<WorkflowTemplate> {
        self.repository
            .get_version(id, version)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("template {} v{}", id, version)))
    }

    pub async fn versions(&self, id: &str) -> Result<Vec<WorkflowTemplate>> {
        self.repository.versions(id).await
    }

    pub async fn list(&self, filter: &TemplateFilter) -> Result<Vec<WorkflowTemplate>> {
        Ok(self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    /// Soft-deactivate every version of a user template
    pub async fn deactivate(&self, id: &str, actor_id: Option<&str>) -> Result<()> {
        let latest = self
            .repository
            .latest(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("template {}", id)))?;

        if latest.is_builtin {
            return Err(WorkflowError::Configuration(format!(
                "built-in template '{}' is read-only",
                id
            )));
        }

        self.repository.set_active(id, false).await?;
        self.record(AuditEventType::TemplateDeactivated, &latest, actor_id)
            .await?;

        warn!(template_id = %id, "Deactivated workflow template");
        Ok(())
    }

    async fn record(
        &self,
        event_type: AuditEventType,
        template: &WorkflowTemplate,
        actor_id: Option<&str>,
    ) -> Result<()> {
        let event = AuditEvent::new(event_type)
            .with_workflow(&template.id)
            .with_actor(actor_id)
            .with_tags(template.compliance_tags.iter().cloned())
            .with_payload(serde_json::json!({
                "name": template.name,
                "version": template.version,
                "category": template.category,
                "steps": template.steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            }));
        self.audit.record(event).await?;
        Ok(())
    }
}

/// Read-only templates available in every deployment
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    use StepKind::*;

    let builtin = |mut t: WorkflowTemplate| {
        t.is_builtin = true;
        t.author = Some("system".to_string());
        t
    };

    vec![
        builtin(
            WorkflowTemplate::new("standard_review", "Standard contract review")
                .with_description("Full pipeline: validate, analyze, negotiate and communicate")
                .with_category("review")
                .with_kinds(&[Validate, Analyze, Negotiate, Communicate])
                .with_tags(["contract-review"]),
        ),
        builtin(
            WorkflowTemplate::new("quick_scan", "Quick risk scan")
                .with_description("Risk analysis and summary without redlining")
                .with_category("review")
                .with_kinds(&[Validate, Analyze, Communicate])
                .with_timeout(120)
                .with_retry_policy(RetryPolicy::new(1))
                .with_rule(BranchRule::new(
                    "thorough on request",
                    BranchCondition::ExecutionPreference {
                        preference: "thorough".to_string(),
                    },
                    BranchAction::add(&["negotiate"]),
                )),
        ),
        builtin(
            WorkflowTemplate::new("parallel_review", "Parallel legal and commercial review")
                .with_description("Legal and commercial analyzers run side by side and are merged")
                .with_category("review")
                .with_step(TemplateStep::of_kind(Validate))
                .with_step(TemplateStep::new("legal_analysis", "analyze"))
                .with_step(TemplateStep::new("commercial_analysis", "analyze"))
                .with_step(TemplateStep::of_kind(Negotiate))
                .with_step(TemplateStep::of_kind(Communicate))
                .with_parallel_group(&["legal_analysis", "commercial_analysis"])
                .with_timeout(600)
                .with_tags(["contract-review"]),
        ),
        builtin(
            WorkflowTemplate::new("risk_escalation", "Risk-based escalation")
                .with_description("Redlining only when the analysis score warrants it")
                .with_category("compliance")
                .with_step(TemplateStep::of_kind(Validate))
                .with_step(TemplateStep::of_kind(Analyze))
                .with_step(TemplateStep::of_kind(Negotiate).optional())
                .with_step(TemplateStep::of_kind(Communicate))
                .with_retry_policy(RetryPolicy::new(3).with_backoff(BackoffStrategy::Exponential {
                    initial_delay_ms: 1_000,
                    max_delay_ms: 30_000,
                    multiplier: 2.0,
                    jitter: true,
                }))
                .with_rule(BranchRule::new(
                    "low risk",
                    BranchCondition::ScoreThreshold {
                        operator: Comparison::Lt,
                        threshold: 0.3,
                    },
                    BranchAction::skip(&["negotiate"]),
                ))
                .with_rule(BranchRule::new(
                    "high risk",
                    BranchCondition::ScoreThreshold {
                        operator: Comparison::Gte,
                        threshold: 0.7,
                    },
                    BranchAction::add(&["negotiate"]),
                ))
                .with_tags(["sox", "contract-review"]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use redline_audit::{AuditFilter, InMemoryAuditLogger};

    async fn registry() -> (TemplateRegistry, InMemoryAuditLogger) {
        let audit = InMemoryAuditLogger::new();
        let registry = TemplateRegistry::in_memory(Arc::new(audit.clone()));
        registry.seed_builtins().await.unwrap();
        (registry, audit)
    }

    fn nda_template() -> WorkflowTemplate {
        WorkflowTemplate::new("nda_review", "NDA review")
            .with_category("nda")
            .with_kinds(&[StepKind::Validate, StepKind::Analyze, StepKind::Communicate])
            .with_tags(["gdpr"])
    }

    #[test]
    fn test_builtins_are_valid() {
        let builtins = builtin_templates();
        assert_eq!(builtins.len(), 4);
        for template in &builtins {
            template.validate().unwrap();
            assert!(template.is_builtin);
        }
    }

    #[test]
    fn test_validation_rules() {
        assert!(WorkflowTemplate::new("empty", "Empty").validate().is_err());

        let duplicate = WorkflowTemplate::new("dup", "Dup")
            .with_step(TemplateStep::new("a", "analyze"))
            .with_step(TemplateStep::new("a", "negotiate"));
        assert!(duplicate.validate().is_err());

        let unknown_kind = WorkflowTemplate::new("x", "X").with_step(TemplateStep::new("s", "summarize"));
        assert!(unknown_kind.validate().is_err());

        let mixed_group = WorkflowTemplate::new("mixed", "Mixed")
            .with_kinds(&[StepKind::Analyze, StepKind::Negotiate])
            .with_parallel_group(&["analyze", "negotiate"]);
        assert!(mixed_group.validate().is_err());

        let zero_timeout = nda_template().with_timeout(0);
        assert!(zero_timeout.validate().is_err());

        let bad_rule = nda_template().with_rule(BranchRule::new(
            "bad",
            BranchCondition::ExecutionPreference {
                preference: "fast".to_string(),
            },
            BranchAction::add(&["escalate"]),
        ));
        assert!(bad_rule.validate().is_err());
    }

    #[test]
    fn test_skip_rules_need_an_optional_target() {
        let skip_negotiate = || {
            BranchRule::new(
                "low risk",
                BranchCondition::ScoreThreshold {
                    operator: Comparison::Lt,
                    threshold: 0.3,
                },
                BranchAction::skip(&["negotiate"]),
            )
        };

        let required = WorkflowTemplate::new("strict", "Strict")
            .with_kinds(&[StepKind::Analyze, StepKind::Negotiate, StepKind::Communicate])
            .with_rule(skip_negotiate());
        let err = required.validate().unwrap_err();
        assert!(err.to_string().contains("no matching step is optional"));

        let optional = WorkflowTemplate::new("lenient", "Lenient")
            .with_step(TemplateStep::of_kind(StepKind::Analyze))
            .with_step(TemplateStep::new("redline", "negotiate").optional())
            .with_step(TemplateStep::of_kind(StepKind::Communicate))
            .with_rule(skip_negotiate());
        assert!(optional.validate().is_ok());

        // Skipping a kind the template never declares is harmless
        let absent = nda_template().with_rule(skip_negotiate());
        assert!(absent.validate().is_ok());
    }

    #[test]
    fn test_invalid_backoff_multiplier_is_rejected() {
        let template = nda_template().with_retry_policy(RetryPolicy::new(3).with_backoff(
            BackoffStrategy::Exponential {
                initial_delay_ms: 500,
                max_delay_ms: 10_000,
                multiplier: f64::NAN,
                jitter: false,
            },
        ));
        assert!(matches!(template.validate(), Err(WorkflowError::InvalidDefinition(_))));
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (registry, audit) = registry().await;

        let created = registry.create(nda_template(), Some("alice")).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.author.as_deref(), Some("alice"));

        let fetched = registry.get("nda_review").await.unwrap();
        assert_eq!(fetched.name, "NDA review");

        let events = audit
            .query(&AuditFilter::for_workflow("nda_review"), 10, 0)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::TemplateCreated);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (registry, _) = registry().await;
        registry.create(nda_template(), None).await.unwrap();

        let err = registry.create(nda_template(), None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));

        let err = registry
            .create(WorkflowTemplate::new("quick_scan", "Shadow").with_kinds(&[StepKind::Analyze]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_publish_version_keeps_history() {
        let (registry, _) = registry().await;
        registry.create(nda_template(), None).await.unwrap();

        let v2 = registry
            .publish_version(nda_template().with_timeout(60), None)
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        assert_eq!(registry.get("nda_review").await.unwrap().timeout_seconds, 60);
        assert_eq!(registry.get_version("nda_review", 1).await.unwrap().timeout_seconds, 300);
        assert_eq!(registry.versions("nda_review").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deactivate_is_soft() {
        let (registry, _) = registry().await;
        registry.create(nda_template(), None).await.unwrap();
        registry.deactivate("nda_review", Some("bob")).await.unwrap();

        assert!(matches!(
            registry.get("nda_review").await,
            Err(WorkflowError::NotFound(_))
        ));
        assert!(registry.get_version("nda_review", 1).await.is_ok());

        let all = registry
            .list(&TemplateFilter {
                include_inactive: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(all.iter().any(|t| t.id == "nda_review" && !t.is_active));
    }

    #[tokio::test]
    async fn test_builtins_are_read_only() {
        let (registry, _) = registry().await;

        let err = registry.deactivate("standard_review", None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));

        let update = WorkflowTemplate::new("quick_scan", "Quick").with_kinds(&[StepKind::Analyze]);
        let err = registry.publish_version(update, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (registry, _) = registry().await;
        registry.create(nda_template(), None).await.unwrap();

        let builtins = registry
            .list(&TemplateFilter {
                builtin_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(builtins.len(), 4);

        let by_tag = registry
            .list(&TemplateFilter {
                tag: Some("sox".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].id, "risk_escalation");

        let search = registry
            .list(&TemplateFilter {
                search: Some("NDA review".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(search.len(), 1);

        let by_category = registry
            .list(&TemplateFilter {
                category: Some("review".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_category.len(), 3);
    }
}
