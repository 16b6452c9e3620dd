//! The workflow run queue.
//!
//! The scheduler does not execute workflows itself. Each dispatch attempt
//! inserts a queued row into `workflow_runs` for an orchestrator to pick up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsflow_core::{ExecutionId, Result, ScheduleId, WorkflowId, WorkflowRunId};
use opsflow_scheduler::{ExecutionError, ExecutionRequest, WorkflowExecutor};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;

/// A run waiting for an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRun {
    pub id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub schedule_id: Option<ScheduleId>,
    pub execution_id: Option<ExecutionId>,
    pub attempt: u32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub queued_at: DateTime<Utc>,
}

impl QueuedRun {
    /// Creates a queued run for one scheduler attempt.
    #[must_use]
    pub fn from_request(request: &ExecutionRequest) -> Self {
        Self {
            id: WorkflowRunId::new(),
            workflow_id: request.workflow_id,
            schedule_id: Some(request.schedule_id),
            execution_id: Some(request.execution_id),
            attempt: request.attempt,
            scheduled_for: Some(request.scheduled_for),
            queued_at: Utc::now(),
        }
    }
}

/// Repository for workflow run operations.
#[derive(Debug, Clone)]
pub struct WorkflowRunRepository {
    pool: PgPool,
}

impl WorkflowRunRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a run in the `queued` state.
    pub async fn enqueue(&self, run: &QueuedRun) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, workflow_id, schedule_id, execution_id, attempt, state, scheduled_for, queued_at)
            VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run.schedule_id.map(|id| id.to_string()))
        .bind(run.execution_id.map(|id| id.to_string()))
        .bind(i32::try_from(run.attempt).unwrap_or(i32::MAX))
        .bind(run.scheduled_for)
        .bind(run.queued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Executes scheduled workflows by queueing a run for each attempt.
#[derive(Debug, Clone)]
pub struct RunQueueExecutor {
    runs: WorkflowRunRepository,
}

impl RunQueueExecutor {
    #[must_use]
    pub fn new(runs: WorkflowRunRepository) -> Self {
        Self { runs }
    }
}

#[async_trait]
impl WorkflowExecutor for RunQueueExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutionError> {
        let run = QueuedRun::from_request(request);
        self.runs
            .enqueue(&run)
            .await
            .map_err(|e| ExecutionError::Failed {
                workflow_id: request.workflow_id,
                reason: format!("failed to queue run: {e}"),
            })?;

        debug!(
            run_id = %run.id,
            workflow_id = %run.workflow_id,
            attempt = run.attempt,
            "workflow run queued"
        );
        Ok(())
    }
}
