//! Core identifiers and utilities for the opsflow automation platform.
//!
//! This crate provides the strongly-typed IDs and the error-handling
//! foundation shared by the workflow, scheduler and server crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    ConnectionStorageId, ExecutionId, NodeStorageId, ParseIdError, ScheduleId, WorkflowId,
    WorkflowRunId,
};
