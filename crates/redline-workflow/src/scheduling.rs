//! Workflow scheduling
//!
//! Provides immediate, delayed, recurring and cron-based template executions.
//! One control loop polls the repository for due schedules and fires each of
//! them as a detached task, so a slow or failing execution never holds up the
//! loop.

use crate::cron::CronExpression;
use crate::engine::{WorkflowEngine, WorkflowInput};
use crate::state::{ExecutionStatus, WorkflowState};
use crate::{Result, WorkflowError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redline_audit::{AuditEvent, AuditEventType, AuditLogger};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a schedule computes its fire times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Fire once, as soon as possible
    Immediate,
    /// Fire once after a duration such as `30m`
    Delayed,
    /// Fire repeatedly, e.g. `every 1h`
    Recurring,
    /// Fire on a five-field cron expression
    Cron,
}

/// Scheduled template execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub template_id: String,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub expression: String,
    pub input: WorkflowInput,
    pub enabled: bool,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fired_count: u32,
    pub max_fires: Option<u32>,
    pub actor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        template_id: &str,
        schedule_type: ScheduleType,
        expression: &str,
        input: WorkflowInput,
    ) -> Self {
        Self {
            id: format!("sched_{}", Uuid::new_v4().simple()),
            template_id: template_id.to_string(),
            schedule_type,
            expression: expression.trim().to_string(),
            input,
            enabled: true,
            next_fire_at: None,
            last_fired_at: None,
            fired_count: 0,
            max_fires: None,
            actor_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_max_fires(mut self, max_fires: u32) -> Self {
        self.max_fires = Some(max_fires);
        self
    }

    pub fn with_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_fires.map_or(false, |max| self.fired_count >= max)
    }

    /// Whether the scheduler should fire this schedule at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && !self.is_exhausted()
            && self.next_fire_at.map_or(false, |at| at <= now)
    }

    /// Fire time following `now`, or `None` when the schedule is spent
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let invalid = |e: String| {
            WorkflowError::Configuration(format!("schedule '{}': {}", self.id, e))
        };

        Ok(match self.schedule_type {
            ScheduleType::Immediate => (self.fired_count == 0).then_some(now),
            ScheduleType::Delayed => {
                let delay = parse_duration(&self.expression).map_err(invalid)?;
                if self.fired_count == 0 {
                    Some(offset(now, delay).map_err(invalid)?)
                } else {
                    None
                }
            }
            ScheduleType::Recurring => {
                let interval = parse_interval(&self.expression).map_err(invalid)?;
                Some(offset(now, interval).map_err(invalid)?)
            }
            ScheduleType::Cron => CronExpression::parse(&self.expression)
                .map_err(invalid)?
                .next_after(now),
        })
    }
}

fn offset(now: DateTime<Utc>, delta: Duration) -> std::result::Result<DateTime<Utc>, String> {
    now.checked_add_signed(delta)
        .ok_or_else(|| format!("fire time {} after {} is out of range", delta, now))
}

/// Parse `45s`, `30m`, `2h`, `1d` or a bare number of seconds
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("duration is empty".to_string());
    }

    let (number, unit) = match text.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&text[..i], c.to_ascii_lowercase()),
        _ => (text, 's'),
    };
    let amount: i64 = number
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a duration", text))?;
    if amount < 0 {
        return Err(format!("duration '{}' is negative", text));
    }

    let duration = match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        other => return Err(format!("unknown duration unit '{}'", other)),
    };
    duration.ok_or_else(|| format!("duration '{}' is too large", text))
}

/// Parse a recurring interval such as `every 1h`
pub fn parse_interval(text: &str) -> std::result::Result<Duration, String> {
    let trimmed = text.trim();
    let body = match trimmed.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("every") => &trimmed[5..],
        _ => trimmed,
    };
    let interval = parse_duration(body)?;
    if interval <= Duration::zero() {
        return Err(format!("interval '{}' must be positive", text));
    }
    Ok(interval)
}

/// Schedule repository trait
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn save(&self, schedule: &Schedule) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Schedule>>;
    async fn list(&self) -> Result<Vec<Schedule>>;
    async fn list_by_template(&self, template_id: &str) -> Result<Vec<Schedule>>;
    /// Enabled, non-exhausted schedules whose next fire time is at or before `now`
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>>;
    async fn update(&self, schedule: &Schedule) -> Result<()>;
}

/// In-memory schedule repository
pub struct InMemoryScheduleRepository {
    schedules: RwLock<HashMap<String, Schedule>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self {
            schedules: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryScheduleRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut schedules: Vec<Schedule>) -> Vec<Schedule> {
    schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    schedules
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn save(&self, schedule: &Schedule) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Schedule>> {
        let schedules = self.schedules.read().await;
        Ok(schedules.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        Ok(sorted(schedules.values().cloned().collect()))
    }

    async fn list_by_template(&self, template_id: &str) -> Result<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        Ok(sorted(
            schedules
                .values()
                .filter(|s| s.template_id == template_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        Ok(sorted(
            schedules
                .values()
                .filter(|s| s.is_due(now))
                .cloned()
                .collect(),
        ))
    }

    async fn update(&self, schedule: &Schedule) -> Result<()> {
        let mut schedules = self.schedules.write().await;
        if schedules.contains_key(&schedule.id) {
            schedules.insert(schedule.id.clone(), schedule.clone());
            Ok(())
        } else {
            Err(WorkflowError::NotFound(format!("schedule {}", schedule.id)))
        }
    }
}

/// An execution started by the scheduler
#[derive(Debug)]
pub struct FiredExecution {
    pub schedule_id: String,
    pub template_id: String,
    pub execution_id: String,
    pub fired_at: DateTime<Utc>,
    /// Resolves to the terminal state; dropping it detaches the execution
    pub handle: JoinHandle<WorkflowState>,
}

/// Workflow scheduler service
pub struct WorkflowScheduler {
    repository: Arc<dyn ScheduleRepository>,
    engine: Arc<WorkflowEngine>,
    audit: Arc<dyn AuditLogger>,
    poll_interval: std::time::Duration,
    running: Arc<RwLock<bool>>,
    /// Serialises fetch-due and mark-fired so no schedule fires twice
    fire_lock: Mutex<()>,
}

impl WorkflowScheduler {
    pub fn new(
        repository: Arc<dyn ScheduleRepository>,
        engine: Arc<WorkflowEngine>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            repository,
            engine,
            audit,
            poll_interval: std::time::Duration::from_secs(60),
            running: Arc::new(RwLock::new(false)),
            fire_lock: Mutex::new(()),
        }
    }

    pub fn with_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.poll_interval = interval.max(std::time::Duration::from_secs(1));
        self
    }

    /// Register a schedule and compute its first fire time
    pub async fn create(&self, mut schedule: Schedule) -> Result<Schedule> {
        if let Err(e) = self.engine.templates().get(&schedule.template_id).await {
            return Err(WorkflowError::Configuration(format!(
                "schedule for template '{}': {}",
                schedule.template_id, e
            )));
        }

        let now = Utc::now();
        schedule.next_fire_at = schedule.next_fire_after(now)?;
        if schedule.next_fire_at.is_none() {
            return Err(WorkflowError::Configuration(format!(
                "schedule expression '{}' never fires",
                schedule.expression
            )));
        }
        if schedule.max_fires == Some(0) {
            return Err(WorkflowError::Configuration(
                "max_fires must be at least 1".to_string(),
            ));
        }

        self.repository.save(&schedule).await?;

        let event = AuditEvent::new(AuditEventType::ScheduleCreated)
            .with_workflow(&schedule.template_id)
            .with_actor(schedule.actor_id.as_deref())
            .with_payload(serde_json::json!({
                "schedule_id": schedule.id,
                "schedule_type": schedule.schedule_type,
                "expression": schedule.expression,
                "next_fire_at": schedule.next_fire_at,
                "max_fires": schedule.max_fires,
            }));
        self.audit.record(event).await?;

        info!(
            schedule_id = %schedule.id,
            template_id = %schedule.template_id,
            schedule_type = ?schedule.schedule_type,
            next = ?schedule.next_fire_at,
            "Created workflow schedule"
        );

        Ok(schedule)
    }

    pub async fn get(&self, id: &str) -> Result<Schedule> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("schedule {}", id)))
    }

    pub async fn list(&self) -> Result<Vec<Schedule>> {
        self.repository.list().await
    }

    /// Enable a schedule
    pub async fn enable(&self, id: &str, actor_id: Option<&str>) -> Result<Schedule> {
        let _guard = self.fire_lock.lock().await;
        let mut schedule = self.get(id).await?;

        let next = schedule.next_fire_after(Utc::now())?;
        if schedule.is_exhausted() || next.is_none() {
            return Err(WorkflowError::Configuration(format!(
                "schedule {} has no remaining fires",
                id
            )));
        }

        schedule.enabled = true;
        schedule.next_fire_at = next;
        self.repository.update(&schedule).await?;
        self.record(AuditEventType::ScheduleEnabled, &schedule, actor_id, serde_json::json!({}))
            .await;

        info!(schedule_id = %id, next = ?schedule.next_fire_at, "Enabled schedule");
        Ok(schedule)
    }

    /// Disable a schedule; it is kept for history
    pub async fn disable(&self, id: &str, actor_id: Option<&str>) -> Result<Schedule> {
        let _guard = self.fire_lock.lock().await;
        let mut schedule = self.get(id).await?;

        schedule.enabled = false;
        self.repository.update(&schedule).await?;
        self.record(
            AuditEventType::ScheduleDisabled,
            &schedule,
            actor_id,
            serde_json::json!({ "reason": "manual" }),
        )
        .await;

        info!(schedule_id = %id, "Disabled schedule");
        Ok(schedule)
    }

    /// Fire every schedule due at `now`
    ///
    /// Each fire is isolated: a schedule that cannot be updated is logged and
    /// skipped without affecting the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<FiredExecution>> {
        let _guard = self.fire_lock.lock().await;
        let due = self.repository.list_due(now).await?;

        debug!(count = due.len(), "Checking due schedules");

        let mut fired = Vec::with_capacity(due.len());
        for schedule in due {
            let schedule_id = schedule.id.clone();
            match self.fire(schedule, now).await {
                Ok(execution) => fired.push(execution),
                Err(e) => {
                    error!(schedule_id = %schedule_id, error = %e, "Failed to fire schedule");
                }
            }
        }

        Ok(fired)
    }

    async fn fire(&self, schedule: Schedule, now: DateTime<Utc>) -> Result<FiredExecution> {
        let mut updated = schedule.clone();
        updated.fired_count += 1;
        updated.last_fired_at = Some(now);
        updated.next_fire_at = match updated.next_fire_after(now) {
            Ok(next) => next,
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %e, "Cannot compute next fire time");
                None
            }
        };

        let spent = updated.next_fire_at.is_none() || updated.is_exhausted();
        if spent {
            updated.enabled = false;
        }

        // Mark fired before launching so a concurrent tick cannot pick it up again
        self.repository.update(&updated).await?;

        let execution_id = Uuid::new_v4().to_string();
        let mut input = updated.input.clone();
        if input.config.actor_id.is_none() {
            input.config.actor_id = updated.actor_id.clone();
        }

        self.record(
            AuditEventType::ScheduleFired,
            &updated,
            None,
            serde_json::json!({
                "execution_id": execution_id,
                "fired_count": updated.fired_count,
                "next_fire_at": updated.next_fire_at,
            }),
        )
        .await;
        if spent {
            self.record(
                AuditEventType::ScheduleDisabled,
                &updated,
                None,
                serde_json::json!({ "reason": "exhausted", "fired_count": updated.fired_count }),
            )
            .await;
        }

        let engine = Arc::clone(&self.engine);
        let audit = Arc::clone(&self.audit);
        let schedule_id = updated.id.clone();
        let template_id = updated.template_id.clone();
        let task_execution_id = execution_id.clone();

        let handle = tokio::spawn(async move {
            let state = engine
                .execute_with_id(task_execution_id, &template_id, input)
                .await;

            if state.status == ExecutionStatus::Failed {
                let error = state.last_error().map(|e| e.message.clone());
                warn!(
                    schedule_id = %schedule_id,
                    execution_id = %state.execution_id,
                    error = ?error,
                    "Scheduled execution failed"
                );
                let event = AuditEvent::new(AuditEventType::ScheduleFireFailed)
                    .with_workflow(&template_id)
                    .with_execution(&state.execution_id)
                    .with_payload(serde_json::json!({
                        "schedule_id": schedule_id,
                        "error": error,
                    }));
                if let Err(e) = audit.record(event).await {
                    warn!(schedule_id = %schedule_id, error = %e, "Failed to record audit event");
                }
            }

            state
        });

        info!(
            schedule_id = %updated.id,
            template_id = %updated.template_id,
            execution_id = %execution_id,
            next = ?updated.next_fire_at,
            "Triggered scheduled workflow"
        );

        Ok(FiredExecution {
            schedule_id: updated.id,
            template_id: updated.template_id,
            execution_id,
            fired_at: now,
            handle,
        })
    }

    async fn record(
        &self,
        event_type: AuditEventType,
        schedule: &Schedule,
        actor_id: Option<&str>,
        mut payload: serde_json::Value,
    ) {
        payload["schedule_id"] = serde_json::json!(schedule.id);
        let event = AuditEvent::new(event_type)
            .with_workflow(&schedule.template_id)
            .with_actor(actor_id.or(schedule.actor_id.as_deref()))
            .with_payload(payload);

        if let Err(e) = self.audit.record(event).await {
            warn!(schedule_id = %schedule.id, error = %e, "Failed to record audit event");
        }
    }

    /// Start the scheduler loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Scheduler already running");
                return;
            }
            *running = true;
        }

        info!(
            poll_interval_seconds = self.poll_interval.as_secs(),
            "Starting workflow scheduler"
        );

        let start = Instant::now() + std::time::Duration::from_secs(1);
        let mut interval = interval_at(start, self.poll_interval);

        loop {
            interval.tick().await;

            let running = *self.running.read().await;
            if !running {
                break;
            }

            if let Err(e) = self.tick(Utc::now()).await {
                error!(error = %e, "Error checking schedules");
            }
        }

        info!("Workflow scheduler stopped");
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!("Stopping workflow scheduler");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StepFailure;
    use crate::step::{StepExecutor, StepKind, StepOutput, TemplateStep};
    use crate::templates::{TemplateRegistry, WorkflowTemplate};
    use redline_audit::{AuditFilter, InMemoryAuditLogger};
    use serde_json::json;
    use tokio_test::assert_err;

    struct Passthrough;

    #[async_trait]
    impl StepExecutor for Passthrough {
        async fn execute(
            &self,
            _step: &TemplateStep,
            kind: StepKind,
            _state: &WorkflowState,
        ) -> std::result::Result<StepOutput, StepFailure> {
            Ok(match kind {
                StepKind::Analyze => StepOutput::new(json!({"risks": []})),
                StepKind::Communicate => StepOutput::new(json!({"draft": "ok"})),
                _ => StepOutput::new(json!({})),
            })
        }
    }

    async fn scheduler() -> (WorkflowScheduler, InMemoryAuditLogger) {
        let audit = InMemoryAuditLogger::new();
        let registry = Arc::new(TemplateRegistry::in_memory(Arc::new(audit.clone())));
        registry
            .create(
                WorkflowTemplate::new("scan", "Scan").with_kinds(&[StepKind::Analyze, StepKind::Communicate]),
                None,
            )
            .await
            .unwrap();
        let engine = Arc::new(WorkflowEngine::new(
            registry,
            Arc::new(Passthrough),
            Arc::new(audit.clone()),
        ));
        let scheduler = WorkflowScheduler::new(
            Arc::new(InMemoryScheduleRepository::new()),
            engine,
            Arc::new(audit.clone()),
        );
        (scheduler, audit)
    }

    fn input() -> WorkflowInput {
        WorkflowInput::new("nightly.txt", "contract text")
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("45").unwrap(), Duration::seconds(45));
        assert_eq!(parse_duration("10S").unwrap(), Duration::seconds(10));
        assert_err!(parse_duration(""));
        assert_err!(parse_duration("5w"));
        assert_err!(parse_duration("soon"));
        assert_err!(parse_duration("9223372036854775807d"));

        assert_eq!(parse_interval("every 1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_interval("Every 15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_interval("90").unwrap(), Duration::seconds(90));
        assert_err!(parse_interval("every 0m"));
    }

    #[test]
    fn test_next_fire_by_type() {
        let t0 = Utc::now();

        let delayed = Schedule::new("scan", ScheduleType::Delayed, "30m", input());
        assert_eq!(delayed.next_fire_after(t0).unwrap(), Some(t0 + Duration::minutes(30)));

        let recurring = Schedule::new("scan", ScheduleType::Recurring, "every 1h", input());
        assert_eq!(recurring.next_fire_after(t0).unwrap(), Some(t0 + Duration::hours(1)));

        let mut immediate = Schedule::new("scan", ScheduleType::Immediate, "", input());
        assert_eq!(immediate.next_fire_after(t0).unwrap(), Some(t0));
        immediate.fired_count = 1;
        assert_eq!(immediate.next_fire_after(t0).unwrap(), None);

        let bad = Schedule::new("scan", ScheduleType::Cron, "* *", input());
        assert!(matches!(bad.next_fire_after(t0), Err(WorkflowError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_list_due_honours_max_fires() {
        let repo = InMemoryScheduleRepository::new();
        let now = Utc::now();

        let mut due = Schedule::new("scan", ScheduleType::Recurring, "every 1m", input()).with_max_fires(2);
        due.next_fire_at = Some(now - Duration::seconds(1));
        let mut spent = due.clone();
        spent.id = "spent".to_string();
        spent.fired_count = 2;
        let mut disabled = due.clone();
        disabled.id = "disabled".to_string();
        disabled.enabled = false;
        let mut later = due.clone();
        later.id = "later".to_string();
        later.next_fire_at = Some(now + Duration::minutes(5));

        for s in [&due, &spent, &disabled, &later] {
            repo.save(s).await.unwrap();
        }

        let listed = repo.list_due(now).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
        assert_eq!(repo.list_by_template("scan").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_template_and_bad_expression() {
        let (scheduler, _) = scheduler().await;

        let missing = Schedule::new("missing", ScheduleType::Immediate, "", input());
        assert!(matches!(scheduler.create(missing).await, Err(WorkflowError::Configuration(_))));

        let bad = Schedule::new("scan", ScheduleType::Delayed, "later", input());
        assert!(matches!(scheduler.create(bad).await, Err(WorkflowError::Configuration(_))));

        let never = Schedule::new("scan", ScheduleType::Cron, "0 0 30 2 *", input());
        assert!(matches!(scheduler.create(never).await, Err(WorkflowError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_durations() {
        let (scheduler, _) = scheduler().await;

        let far = Schedule::new("scan", ScheduleType::Delayed, "100000000d", input());
        assert!(matches!(scheduler.create(far).await, Err(WorkflowError::Configuration(_))));

        let huge = Schedule::new("scan", ScheduleType::Recurring, "every 9223372036854775807d", input());
        assert!(matches!(scheduler.create(huge).await, Err(WorkflowError::Configuration(_))));

        assert!(scheduler.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_fires_once_then_disables() {
        let (scheduler, audit) = scheduler().await;
        let created = scheduler
            .create(Schedule::new("scan", ScheduleType::Immediate, "", input()))
            .await
            .unwrap();

        let now = Utc::now();
        let fired = scheduler.tick(now).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert!(scheduler.tick(now).await.unwrap().is_empty());

        let execution = fired.into_iter().next().unwrap();
        let state = execution.handle.await.unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.execution_id, execution.execution_id);

        let stored = scheduler.get(&created.id).await.unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.fired_count, 1);
        assert_eq!(stored.last_fired_at, Some(now));

        let disabled = audit
            .query(
                &AuditFilter::default().with_event_types(vec![AuditEventType::ScheduleDisabled]),
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(disabled.len(), 1);
        assert!(scheduler.enable(&created.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_recurring_reschedules_from_fire_time() {
        let (scheduler, _) = scheduler().await;
        let created = scheduler
            .create(Schedule::new("scan", ScheduleType::Recurring, "every 1h", input()).with_max_fires(2))
            .await
            .unwrap();
        let first_due = created.next_fire_at.unwrap();

        assert!(scheduler.tick(first_due - Duration::seconds(1)).await.unwrap().is_empty());

        let t0 = first_due + Duration::seconds(5);
        assert_eq!(scheduler.tick(t0).await.unwrap().len(), 1);
        let stored = scheduler.get(&created.id).await.unwrap();
        assert_eq!(stored.next_fire_at, Some(t0 + Duration::hours(1)));
        assert!(stored.enabled);

        let t1 = t0 + Duration::hours(1);
        assert_eq!(scheduler.tick(t1).await.unwrap().len(), 1);
        let stored = scheduler.get(&created.id).await.unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.fired_count, 2);
    }

    #[tokio::test]
    async fn test_failed_execution_is_audited_and_loop_continues() {
        let (scheduler, audit) = scheduler().await;
        scheduler
            .create(Schedule::new("scan", ScheduleType::Immediate, "", WorkflowInput::new("empty.txt", "")))
            .await
            .unwrap();
        scheduler
            .create(Schedule::new("scan", ScheduleType::Immediate, "", input()))
            .await
            .unwrap();

        let fired = scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(fired.len(), 2);

        let mut statuses = Vec::new();
        for execution in fired {
            statuses.push(execution.handle.await.unwrap().status);
        }
        assert!(statuses.contains(&ExecutionStatus::Failed));
        assert!(statuses.contains(&ExecutionStatus::Completed));

        let failures = audit
            .query(
                &AuditFilter::default().with_event_types(vec![AuditEventType::ScheduleFireFailed]),
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let (scheduler, _) = scheduler().await;
        let created = scheduler
            .create(Schedule::new("scan", ScheduleType::Cron, "*/5 * * * *", input()).with_actor("ops"))
            .await
            .unwrap();

        let disabled = scheduler.disable(&created.id, Some("ops")).await.unwrap();
        assert!(!disabled.enabled);
        let far_future = Utc::now() + Duration::days(1);
        assert!(scheduler.tick(far_future).await.unwrap().is_empty());

        let enabled = scheduler.enable(&created.id, None).await.unwrap();
        assert!(enabled.enabled);
        assert!(enabled.next_fire_at.is_some());
        assert_eq!(scheduler.list().await.unwrap().len(), 1);
    }
}
