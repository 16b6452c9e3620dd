//! JSON API routes.

use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use opsflow_core::WorkflowId;
use opsflow_scheduler::{
    CronValidation, Schedule, ScheduleConflicts, ScheduleEngine, SchedulerJob, SchedulerStatus,
    parse_cron_expression,
};
use opsflow_workflow::{
    CanvasSnapshot, CanvasStore, NodeConfig, NodePayload, NodeRecord, SyncRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub canvas: Arc<dyn CanvasStore>,
    pub schedules: ScheduleEngine,
    pub scheduler: Arc<SchedulerJob>,
}

/// Builds the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/workflows/{workflow_id}/canvas",
            get(load_canvas).put(sync_canvas),
        )
        .route("/api/workflows/{workflow_id}/nodes", post(upsert_node))
        .route(
            "/api/workflows/{workflow_id}/schedules/conflicts",
            get(schedule_conflicts),
        )
        .route("/api/workflows/{workflow_id}/schedules", post(create_schedule))
        .route("/api/cron/validate", post(validate_cron))
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/stats/reset", post(reset_scheduler_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn check_node(node: &NodePayload) -> Result<(), ApiError> {
    NodeConfig::parse(node.node_type, &node.configuration)
        .map(|_| ())
        .map_err(|reason| ApiError::BadRequest {
            message: format!("node {}: {reason}", node.graph_id),
        })
}

async fn load_canvas(
    State(state): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
) -> Result<Json<CanvasSnapshot>, ApiError> {
    Ok(Json(state.canvas.load(workflow_id).await?))
}

async fn sync_canvas(
    State(state): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<CanvasSnapshot>, ApiError> {
    request.nodes.iter().try_for_each(check_node)?;
    let snapshot = state.canvas.sync(workflow_id, request).await?;
    Ok(Json(snapshot))
}

async fn upsert_node(
    State(state): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    Json(node): Json<NodePayload>,
) -> Result<Json<NodeRecord>, ApiError> {
    check_node(&node)?;
    Ok(Json(state.canvas.upsert_node(workflow_id, node).await?))
}

async fn schedule_conflicts(
    State(state): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
) -> Result<Json<ScheduleConflicts>, ApiError> {
    Ok(Json(
        state.schedules.check_schedule_conflicts(workflow_id).await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateScheduleRequest {
    cron_expression: String,
    #[serde(default)]
    timezone: Option<String>,
}

async fn create_schedule(
    State(state): State<AppState>,
    Path(workflow_id): Path<WorkflowId>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let schedule = state
        .schedules
        .create_schedule(
            workflow_id,
            &request.cron_expression,
            request.timezone.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[derive(Debug, Deserialize)]
struct ValidateCronRequest {
    expression: String,
}

async fn validate_cron(Json(request): Json<ValidateCronRequest>) -> Json<CronValidation> {
    Json(parse_cron_expression(&request.expression))
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn reset_scheduler_stats(State(state): State<AppState>) -> StatusCode {
    state.scheduler.reset_stats();
    info!("scheduler stats reset via api");
    StatusCode::NO_CONTENT
}
