//! Schedules and their dispatch records.

use crate::cron::{CronExpression, CronShape, calculate_next_run_from};
use crate::error::ScheduleError;
use chrono::{DateTime, Duration, Utc};
use opsflow_core::{ExecutionId, Result, ScheduleId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Timezone used when a schedule does not name one.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// How often a schedule can fire, derived from its cron shape.
///
/// The job checks slow tiers less often than `Frequent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceTier {
    /// Hourly, every-N-minutes and other custom shapes.
    Frequent,
    Daily,
    Weekly,
    Monthly,
}

impl CadenceTier {
    #[must_use]
    pub fn from_shape(shape: CronShape) -> Self {
        match shape {
            CronShape::Daily { .. } => Self::Daily,
            CronShape::Weekly { .. } => Self::Weekly,
            CronShape::Monthly { .. } => Self::Monthly,
            CronShape::Hourly { .. } | CronShape::Custom => Self::Frequent,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Frequent => "frequent",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "frequent" => Some(Self::Frequent),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

/// Binds a workflow to a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: ScheduleId,
    pub workflow_id: WorkflowId,
    pub cron_expression: String,
    /// IANA timezone name the expression is evaluated in.
    pub timezone: String,
    pub frequency: CadenceTier,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// No run is scheduled before this instant.
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    /// No run is scheduled after this instant.
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Creates an enabled schedule whose first run is the next match after now.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCronExpression`, `InvalidTimezone` or `NoUpcomingRun`.
    pub fn new(
        workflow_id: WorkflowId,
        cron_expression: &str,
        timezone: Option<&str>,
    ) -> Result<Self, ScheduleError> {
        Self::new_at(workflow_id, cron_expression, timezone, Utc::now())
    }

    /// Like [`new`](Self::new), evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCronExpression`, `InvalidTimezone` or `NoUpcomingRun`.
    pub fn new_at(
        workflow_id: WorkflowId,
        cron_expression: &str,
        timezone: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let timezone = timezone.unwrap_or(DEFAULT_TIMEZONE);
        let cron = CronExpression::parse(cron_expression).map_err(|err| {
            ScheduleError::InvalidCronExpression {
                expression: cron_expression.to_string(),
                reason: err.to_string(),
            }
        })?;
        let next_run_at = calculate_next_run_from(cron.as_str(), timezone, now)?;

        Ok(Self {
            id: ScheduleId::new(),
            workflow_id,
            cron_expression: cron.as_str().to_string(),
            timezone: timezone.to_string(),
            frequency: CadenceTier::from_shape(cron.shape()),
            enabled: true,
            next_run_at: Some(next_run_at),
            last_run_at: None,
            start_at: None,
            end_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Bounds the schedule to `[start_at, end_at]` and recomputes the first
    /// run as of `now`.
    ///
    /// A window that has already closed leaves the schedule with no next run.
    ///
    /// # Errors
    ///
    /// Returns the cron or timezone error if the expression does not evaluate.
    pub fn with_window(
        mut self,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        self.start_at = start_at;
        self.end_at = end_at;
        self.next_run_at = self.next_run_after(now)?;
        Ok(self)
    }

    /// Next fire strictly after `after` that falls inside the window.
    ///
    /// A fire exactly at `start_at` or `end_at` is inside.
    ///
    /// # Errors
    ///
    /// Returns the cron or timezone error if the expression does not evaluate.
    pub fn next_run_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let from = match self.start_at {
            Some(start) if start > after => start - Duration::nanoseconds(1),
            _ => after,
        };
        if self.end_at.is_some_and(|end| from >= end) {
            return Ok(None);
        }
        let next = calculate_next_run_from(&self.cron_expression, &self.timezone, from)?;
        Ok(match self.end_at {
            Some(end) if next > end => None,
            _ => Some(next),
        })
    }

    /// Whether the schedule is due now.
    #[must_use]
    pub fn should_run_now(&self) -> bool {
        self.should_run_at(Utc::now())
    }

    /// Whether the schedule is enabled and its next run is at or before `now`.
    #[must_use]
    pub fn should_run_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|next| next <= now)
    }

    /// Records a fire at `now` and computes the following run.
    ///
    /// The next run is cleared once it would fall past `end_at`.
    ///
    /// # Errors
    ///
    /// Returns the cron or timezone error if the stored expression no
    /// longer evaluates. The schedule is left unchanged in that case.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let next = self.next_run_after(now)?;
        self.last_run_at = Some(now);
        self.next_run_at = next;
        self.updated_at = now;
        Ok(())
    }

    /// Enables or disables the schedule.
    ///
    /// Re-enabling recomputes the next run from `now` so missed fires are
    /// not replayed.
    ///
    /// # Errors
    ///
    /// Returns the cron or timezone error when re-enabling fails to
    /// compute a next run.
    pub fn set_enabled(&mut self, enabled: bool, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        if enabled && !self.enabled {
            self.next_run_at = self.next_run_after(now)?;
        }
        self.enabled = enabled;
        self.updated_at = now;
        Ok(())
    }
}

/// Status of a scheduled execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Waiting for a worker slot.
    Pending,
    /// Currently executing (possibly between retries).
    Running,
    /// Completed successfully.
    Completed,
    /// Failed after exhausting retries.
    Failed,
}

/// One dispatch of a due schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledExecution {
    pub id: ExecutionId,
    pub schedule_id: ScheduleId,
    pub workflow_id: WorkflowId,
    /// The `nextRunAt` that made the schedule due.
    pub scheduled_for: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ScheduledExecution {
    /// Creates a pending execution for a due schedule.
    #[must_use]
    pub fn for_schedule(schedule: &Schedule, now: DateTime<Utc>) -> Self {
        Self {
            id: ExecutionId::new(),
            schedule_id: schedule.id,
            workflow_id: schedule.workflow_id,
            scheduled_for: schedule.next_run_at.unwrap_or(now),
            status: ExecutionStatus::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Marks the execution as started.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(now);
    }

    /// Counts one attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Marks the execution as completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(now);
        self.error = None;
    }

    /// Marks the execution as failed.
    pub fn fail(&mut self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(reason.into());
    }

    /// Time from start to completion, once both are known.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn schedule(next_run_at: Option<DateTime<Utc>>, enabled: bool) -> Schedule {
        let mut schedule =
            Schedule::new(WorkflowId::new(), "0 9 * * *", None).expect("schedule");
        schedule.next_run_at = next_run_at;
        schedule.enabled = enabled;
        schedule
    }

    #[test]
    fn should_run_now_requires_enabled_and_past_next_run() {
        let now = Utc::now();
        assert!(schedule(Some(now - Duration::seconds(1)), true).should_run_now());
        assert!(!schedule(Some(now - Duration::seconds(1)), false).should_run_now());
        assert!(!schedule(Some(now + Duration::seconds(60)), true).should_run_now());
        assert!(!schedule(None, true).should_run_now());
    }

    #[test]
    fn new_schedule_computes_next_run_and_tier() {
        let now = at("2026-05-04T10:00:00Z");
        let schedule =
            Schedule::new_at(WorkflowId::new(), "0 8 * * 1", Some("UTC"), now).expect("schedule");

        assert_eq!(schedule.frequency, CadenceTier::Weekly);
        assert_eq!(schedule.next_run_at, Some(at("2026-05-11T08:00:00Z")));
        assert!(schedule.enabled);
        assert_eq!(schedule.timezone, "UTC");
    }

    #[test]
    fn new_schedule_rejects_bad_expression() {
        let result = Schedule::new(WorkflowId::new(), "0 9 *", None);
        assert!(result.is_err());
    }

    #[test]
    fn cadence_tiers_follow_shape() {
        let tier = |expr: &str| {
            Schedule::new(WorkflowId::new(), expr, None)
                .expect("schedule")
                .frequency
        };
        assert_eq!(tier("*/5 * * * *"), CadenceTier::Frequent);
        assert_eq!(tier("15 * * * *"), CadenceTier::Frequent);
        assert_eq!(tier("0 9 * * *"), CadenceTier::Daily);
        assert_eq!(tier("0 9 1 * *"), CadenceTier::Monthly);
    }

    #[test]
    fn advance_moves_next_run_forward() {
        let now = at("2026-05-04T09:00:30Z");
        let mut schedule =
            Schedule::new_at(WorkflowId::new(), "0 9 * * *", None, at("2026-05-03T12:00:00Z"))
                .expect("schedule");
        assert!(schedule.should_run_at(now));

        schedule.advance(now).expect("advance");

        assert_eq!(schedule.last_run_at, Some(now));
        assert_eq!(schedule.next_run_at, Some(at("2026-05-05T09:00:00Z")));
        assert!(!schedule.should_run_at(now));
    }

    #[test]
    fn re_enabling_skips_missed_runs() {
        let created = at("2026-05-01T00:00:00Z");
        let mut schedule =
            Schedule::new_at(WorkflowId::new(), "0 9 * * *", None, created).expect("schedule");
        schedule.set_enabled(false, created).expect("disable");

        let later = at("2026-05-10T12:00:00Z");
        schedule.set_enabled(true, later).expect("enable");

        assert_eq!(schedule.next_run_at, Some(at("2026-05-11T09:00:00Z")));
    }

    #[test]
    fn future_start_delays_the_first_run() {
        let now = at("2026-05-04T10:00:00Z");
        let schedule = Schedule::new_at(WorkflowId::new(), "0 9 * * *", None, now)
            .and_then(|s| s.with_window(Some(at("2030-01-01T09:00:00Z")), None, now))
            .expect("schedule");

        assert_eq!(schedule.next_run_at, Some(at("2030-01-01T09:00:00Z")));
        assert!(!schedule.should_run_at(at("2029-12-31T09:00:00Z")));
    }

    #[test]
    fn closed_window_leaves_no_next_run() {
        let now = at("2026-05-04T10:00:00Z");
        let schedule = Schedule::new_at(WorkflowId::new(), "0 9 * * *", None, now)
            .and_then(|s| {
                s.with_window(
                    Some(at("2019-01-01T00:00:00Z")),
                    Some(at("2020-01-01T00:00:00Z")),
                    now,
                )
            })
            .expect("schedule");

        assert!(schedule.enabled);
        assert_eq!(schedule.next_run_at, None);
        assert!(!schedule.should_run_at(at("2030-01-01T00:00:00Z")));
    }

    #[test]
    fn advance_past_end_clears_next_run() {
        let created = at("2026-05-03T12:00:00Z");
        let mut schedule = Schedule::new_at(WorkflowId::new(), "0 9 * * *", None, created)
            .and_then(|s| s.with_window(None, Some(at("2026-05-05T08:00:00Z")), created))
            .expect("schedule");
        assert_eq!(schedule.next_run_at, Some(at("2026-05-04T09:00:00Z")));

        let fired = at("2026-05-04T09:00:30Z");
        schedule.advance(fired).expect("advance");

        assert_eq!(schedule.last_run_at, Some(fired));
        assert_eq!(schedule.next_run_at, None);
    }

    #[test]
    fn run_exactly_at_end_is_kept() {
        let created = at("2026-05-03T12:00:00Z");
        let schedule = Schedule::new_at(WorkflowId::new(), "0 9 * * *", None, created)
            .and_then(|s| s.with_window(None, Some(at("2026-05-04T09:00:00Z")), created))
            .expect("schedule");

        assert_eq!(schedule.next_run_at, Some(at("2026-05-04T09:00:00Z")));
    }

    #[test]
    fn scheduled_execution_lifecycle() {
        let schedule = schedule(Some(Utc::now()), true);
        let now = Utc::now();
        let mut execution = ScheduledExecution::for_schedule(&schedule, now);
        assert_eq!(execution.status, ExecutionStatus::Pending);

        execution.start(now);
        execution.record_attempt();
        execution.record_attempt();
        assert_eq!(execution.status, ExecutionStatus::Running);

        execution.fail(now + Duration::milliseconds(250), "boom");
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.attempts, 2);
        assert_eq!(execution.duration(), Some(Duration::milliseconds(250)));
        assert_eq!(execution.error.as_deref(), Some("boom"));
    }
}
