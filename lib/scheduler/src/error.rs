//! Error types for the scheduler crate.
//!
//! Errors are layered with rootcause:
//! - `CronParseError`: a malformed cron expression, naming the field
//! - `ScheduleError`: schedule bookkeeping and next-run computation
//! - `ExecutionError`: a single workflow dispatch attempt
//! - `SchedulerError`: the polling job

use crate::cron::CronField;
use opsflow_core::{ScheduleId, WorkflowId};
use std::fmt;

/// Why a cron expression was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronParseError {
    /// The expression does not have exactly five fields.
    WrongFieldCount { found: usize },
    /// One field is malformed or out of range.
    InvalidField {
        field: CronField,
        value: String,
        reason: String,
    },
}

impl fmt::Display for CronParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongFieldCount { found } => write!(
                f,
                "cron expression must have exactly 5 fields (minute hour day month weekday), found {found}"
            ),
            Self::InvalidField {
                field,
                value,
                reason,
            } => write!(f, "invalid {field} field '{value}': {reason}"),
        }
    }
}

impl std::error::Error for CronParseError {}

/// Errors from schedule operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
    /// Unknown IANA timezone name.
    InvalidTimezone { timezone: String },
    /// The expression never matches within the search horizon.
    NoUpcomingRun { expression: String },
    /// The workflow already has an enabled schedule.
    Conflict {
        workflow_id: WorkflowId,
        existing: ScheduleId,
    },
    /// Schedule not found.
    NotFound { id: ScheduleId },
    /// A workflow node cannot back a schedule.
    InvalidScheduleNode { reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTimezone { timezone } => write!(f, "invalid timezone: {timezone}"),
            Self::NoUpcomingRun { expression } => {
                write!(f, "cron expression '{expression}' has no upcoming run")
            }
            Self::Conflict {
                workflow_id,
                existing,
            } => write!(
                f,
                "workflow {workflow_id} already has an enabled schedule ({existing})"
            ),
            Self::NotFound { id } => write!(f, "schedule not found: {id}"),
            Self::InvalidScheduleNode { reason } => write!(f, "invalid schedule node: {reason}"),
            Self::StorageFailed { reason } => write!(f, "schedule storage failed: {reason}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from dispatching one workflow run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The executor could not start or finish the run.
    Failed {
        workflow_id: WorkflowId,
        reason: String,
    },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed {
                workflow_id,
                reason,
            } => write!(f, "execution of workflow {workflow_id} failed: {reason}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

/// Errors from the scheduler job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Collecting due schedules failed.
    PollFailed { reason: String },
    /// A schedule exhausted its retries.
    RetriesExhausted {
        schedule_id: ScheduleId,
        attempts: u32,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PollFailed { reason } => write!(f, "scheduler poll failed: {reason}"),
            Self::RetriesExhausted {
                schedule_id,
                attempts,
                reason,
            } => write!(
                f,
                "schedule {schedule_id} failed after {attempts} attempts: {reason}"
            ),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_count_error_mentions_five_fields() {
        let err = CronParseError::WrongFieldCount { found: 3 };
        assert!(err.to_string().contains("5 fields"));
    }

    #[test]
    fn field_error_names_field() {
        let err = CronParseError::InvalidField {
            field: CronField::Weekday,
            value: "7".to_string(),
            reason: "value 7 is out of range 0-6".to_string(),
        };
        assert!(err.to_string().contains("weekday"));
    }

    #[test]
    fn conflict_names_existing_schedule() {
        let existing = ScheduleId::new();
        let err = ScheduleError::Conflict {
            workflow_id: WorkflowId::new(),
            existing,
        };
        assert!(err.to_string().contains(&existing.to_string()));
    }

    #[test]
    fn retries_exhausted_display() {
        let err = SchedulerError::RetriesExhausted {
            schedule_id: ScheduleId::new(),
            attempts: 3,
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
