//! HTTP error responses.
//!
//! Domain errors are converted to [`ApiError`], which carries only a
//! user-safe message. The detailed report is logged at the conversion site.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use opsflow_scheduler::ScheduleError;
use opsflow_workflow::StoreError;
use rootcause::Report;
use serde::Serialize;
use std::fmt;
use tracing::error;

/// An error returned to API clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request is malformed or violates a domain rule.
    BadRequest { message: String },
    /// The addressed resource does not exist.
    NotFound { message: String },
    /// The request conflicts with existing state.
    Conflict { message: String },
    /// Something failed server-side. Details are only logged.
    Internal,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest { message } => write!(f, "bad request: {message}"),
            Self::NotFound { message } => write!(f, "not found: {message}"),
            Self::Conflict { message } => write!(f, "conflict: {message}"),
            Self::Internal => write!(f, "internal server error"),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest { message } | Self::NotFound { message } | Self::Conflict { message } => {
                message
            }
            Self::Internal => "internal server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message(),
        });
        (self.status(), body).into_response()
    }
}

impl From<Report<ScheduleError>> for ApiError {
    fn from(report: Report<ScheduleError>) -> Self {
        let message = report.current_context().to_string();
        match report.current_context() {
            ScheduleError::InvalidCronExpression { .. }
            | ScheduleError::InvalidTimezone { .. }
            | ScheduleError::NoUpcomingRun { .. }
            | ScheduleError::InvalidScheduleNode { .. } => Self::BadRequest { message },
            ScheduleError::Conflict { .. } => Self::Conflict { message },
            ScheduleError::NotFound { .. } => Self::NotFound { message },
            ScheduleError::StorageFailed { .. } => {
                error!(error = %report, "schedule storage failed");
                Self::Internal
            }
        }
    }
}

impl From<Report<StoreError>> for ApiError {
    fn from(report: Report<StoreError>) -> Self {
        error!(error = %report, "canvas storage failed");
        Self::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsflow_core::{ScheduleId, WorkflowId};

    #[test]
    fn schedule_conflict_maps_to_409() {
        let report: Report<ScheduleError> = ScheduleError::Conflict {
            workflow_id: WorkflowId::new(),
            existing: ScheduleId::new(),
        }
        .into();

        let err = ApiError::from(report);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.message().contains("already has an enabled schedule"));
    }

    #[test]
    fn storage_failures_hide_details() {
        let report: Report<StoreError> = StoreError::Database {
            details: "password authentication failed".to_string(),
        }
        .into();

        let err = ApiError::from(report);
        assert_eq!(err, ApiError::Internal);
        assert_eq!(err.message(), "internal server error");
    }
}
