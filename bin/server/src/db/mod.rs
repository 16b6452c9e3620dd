//! PostgreSQL implementations of the opsflow stores.
//!
//! This module provides data access for:
//! - Workflow canvases (nodes and connections keyed by graph ID)
//! - Workflow schedules
//! - The workflow run queue fed by the scheduler

pub mod canvas;
pub mod schedule;
pub mod workflow_run;

pub use canvas::PgCanvasStore;
pub use schedule::PgScheduleStore;
pub use workflow_run::{QueuedRun, RunQueueExecutor, WorkflowRunRepository};

use std::fmt;
use std::str::FromStr;

/// Parses a stored text column into a typed value, naming the column on failure.
fn parse_column<T>(column: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    T::from_str(value).map_err(|e| format!("invalid {column} '{value}': {e}"))
}
