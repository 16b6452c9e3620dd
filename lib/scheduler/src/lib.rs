//! Scheduling for opsflow workflows.
//!
//! This crate provides:
//!
//! - **Cron**: five-field expression parsing, descriptions and
//!   timezone-aware next-run computation
//! - **Schedules**: the binding of a workflow to a cron expression
//! - **Engine**: conflict rules, tiered due-schedule selection and dispatch
//! - **Job**: the background poller with bounded concurrency and retries

pub mod cron;
pub mod engine;
pub mod error;
pub mod job;
pub mod schedule;
pub mod store;

pub use cron::{
    CronExpression, CronField, CronShape, CronValidation, calculate_next_run,
    calculate_next_run_from, parse_cron_expression, parse_timezone,
};
pub use engine::{
    DispatchSummary, ExecutionRequest, ScheduleConflicts, ScheduleEngine, WorkflowExecutor,
};
pub use error::{CronParseError, ExecutionError, ScheduleError, SchedulerError};
pub use job::{SchedulerJob, SchedulerJobConfig, SchedulerStats, SchedulerStatus};
pub use schedule::{CadenceTier, DEFAULT_TIMEZONE, ExecutionStatus, Schedule, ScheduledExecution};
pub use store::{InMemoryScheduleStore, ScheduleStore};
