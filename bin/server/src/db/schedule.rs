//! Schedule persistence in `workflow_schedules`.

use super::parse_column;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsflow_core::{Result, ScheduleId, WorkflowId};
use opsflow_scheduler::{CadenceTier, Schedule, ScheduleError, ScheduleStore};
use sqlx::{FromRow, PgPool};

const SCHEDULE_COLUMNS: &str = "id, workflow_id, cron_expression, timezone, frequency, enabled, \
     next_run_at, last_run_at, start_at, end_at, created_at, updated_at";

/// Row type for schedule queries.
#[derive(Debug, FromRow)]
struct ScheduleRow {
    id: String,
    workflow_id: String,
    cron_expression: String,
    timezone: String,
    frequency: String,
    enabled: bool,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ScheduleRow {
    fn try_into_schedule(self) -> Result<Schedule, ScheduleError> {
        let corrupt = |reason: String| ScheduleError::StorageFailed { reason };

        let id: ScheduleId = parse_column("schedule id", &self.id).map_err(corrupt)?;
        let workflow_id: WorkflowId =
            parse_column("workflow id", &self.workflow_id).map_err(corrupt)?;
        let frequency = CadenceTier::parse(&self.frequency).ok_or_else(|| {
            corrupt(format!(
                "schedule {} has unknown frequency '{}'",
                self.id, self.frequency
            ))
        })?;

        Ok(Schedule {
            id,
            workflow_id,
            cron_expression: self.cron_expression,
            timezone: self.timezone,
            frequency,
            enabled: self.enabled,
            next_run_at: self.next_run_at,
            last_run_at: self.last_run_at,
            start_at: self.start_at,
            end_at: self.end_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn storage_error(err: sqlx::Error) -> ScheduleError {
    ScheduleError::StorageFailed {
        reason: err.to_string(),
    }
}

/// Schedule store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn insert(&self, schedule: Schedule) -> Result<(), ScheduleError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO workflow_schedules ({SCHEDULE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#
        ))
        .bind(schedule.id.to_string())
        .bind(schedule.workflow_id.to_string())
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.frequency.as_str())
        .bind(schedule.enabled)
        .bind(schedule.next_run_at)
        .bind(schedule.last_run_at)
        .bind(schedule.start_at)
        .bind(schedule.end_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn get(&self, id: ScheduleId) -> Result<Schedule, ScheduleError> {
        let row: Option<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM workflow_schedules WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => row.try_into_schedule(),
            None => Err(ScheduleError::NotFound { id }.into()),
        }
    }

    async fn update(&self, schedule: &Schedule) -> Result<(), ScheduleError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_schedules
            SET cron_expression = $2, timezone = $3, frequency = $4, enabled = $5,
                next_run_at = $6, last_run_at = $7, start_at = $8, end_at = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.frequency.as_str())
        .bind(schedule.enabled)
        .bind(schedule.next_run_at)
        .bind(schedule.last_run_at)
        .bind(schedule.start_at)
        .bind(schedule.end_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?
        .rows_affected();

        if updated == 0 {
            return Err(ScheduleError::NotFound { id: schedule.id }.into());
        }
        Ok(())
    }

    async fn delete(&self, id: ScheduleId) -> Result<(), ScheduleError> {
        let deleted = sqlx::query("DELETE FROM workflow_schedules WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?
            .rows_affected();

        if deleted == 0 {
            return Err(ScheduleError::NotFound { id }.into());
        }
        Ok(())
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM workflow_schedules WHERE workflow_id = $1 ORDER BY created_at"
        ))
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(ScheduleRow::try_into_schedule).collect()
    }

    async fn due(
        &self,
        tier: Option<CadenceTier>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SCHEDULE_COLUMNS}
            FROM workflow_schedules
            WHERE enabled
              AND next_run_at IS NOT NULL
              AND next_run_at <= $1
              AND ($2::text IS NULL OR frequency = $2)
            ORDER BY next_run_at ASC
            LIMIT $3
            "#
        ))
        .bind(now)
        .bind(tier.map(CadenceTier::as_str))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(ScheduleRow::try_into_schedule).collect()
    }

    async fn advance(
        &self,
        schedule: &Schedule,
        previous_next_run: Option<DateTime<Utc>>,
    ) -> Result<bool, ScheduleError> {
        // A missing row also reads as "not claimed".
        let claimed = sqlx::query(
            r#"
            UPDATE workflow_schedules
            SET next_run_at = $2, last_run_at = $3, updated_at = $4
            WHERE id = $1 AND next_run_at IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.next_run_at)
        .bind(schedule.last_run_at)
        .bind(schedule.updated_at)
        .bind(previous_next_run)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?
        .rows_affected();

        Ok(claimed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(frequency: &str) -> ScheduleRow {
        ScheduleRow {
            id: ScheduleId::new().to_string(),
            workflow_id: WorkflowId::new().to_string(),
            cron_expression: "0 9 * * *".to_string(),
            timezone: "Europe/Paris".to_string(),
            frequency: frequency.to_string(),
            enabled: true,
            next_run_at: Some(Utc::now()),
            last_run_at: None,
            start_at: None,
            end_at: Some(Utc::now() + chrono::Duration::days(30)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_decodes_into_schedule() {
        let schedule = row("daily").try_into_schedule().expect("decode");
        assert_eq!(schedule.frequency, CadenceTier::Daily);
        assert_eq!(schedule.timezone, "Europe/Paris");
        assert_eq!(schedule.start_at, None);
        assert!(schedule.end_at.is_some());
    }

    #[test]
    fn unknown_frequency_is_rejected() {
        let err = row("hourly").try_into_schedule().expect_err("unknown tier");
        assert!(matches!(
            err.current_context(),
            ScheduleError::StorageFailed { .. }
        ));
    }
}
