//! Schedule persistence.

use crate::error::ScheduleError;
use crate::schedule::{CadenceTier, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsflow_core::{Result, ScheduleId, WorkflowId};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Storage backend for schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Stores a new schedule.
    async fn insert(&self, schedule: Schedule) -> Result<(), ScheduleError>;

    /// Gets a schedule by ID.
    async fn get(&self, id: ScheduleId) -> Result<Schedule, ScheduleError>;

    /// Overwrites an existing schedule.
    async fn update(&self, schedule: &Schedule) -> Result<(), ScheduleError>;

    /// Deletes a schedule.
    async fn delete(&self, id: ScheduleId) -> Result<(), ScheduleError>;

    /// Lists all schedules for a workflow, enabled or not.
    async fn list_for_workflow(&self, workflow_id: WorkflowId)
    -> Result<Vec<Schedule>, ScheduleError>;

    /// Enabled schedules of the given tier with `next_run_at <= now`, oldest first.
    ///
    /// `None` selects every tier.
    async fn due(
        &self,
        tier: Option<CadenceTier>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError>;

    /// Persists a fired schedule's new run times, but only if its stored
    /// `next_run_at` still equals `previous_next_run`.
    ///
    /// Returns `false` when another writer advanced the schedule first. This
    /// is the claim point for running more than one scheduler process.
    async fn advance(
        &self,
        schedule: &Schedule,
        previous_next_run: Option<DateTime<Utc>>,
    ) -> Result<bool, ScheduleError>;
}

/// A process-local schedule store.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    schedules: Mutex<HashMap<ScheduleId, Schedule>>,
}

impl InMemoryScheduleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn insert(&self, schedule: Schedule) -> Result<(), ScheduleError> {
        self.schedules.lock().await.insert(schedule.id, schedule);
        Ok(())
    }

    async fn get(&self, id: ScheduleId) -> Result<Schedule, ScheduleError> {
        self.schedules
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound { id }.into())
    }

    async fn update(&self, schedule: &Schedule) -> Result<(), ScheduleError> {
        let mut schedules = self.schedules.lock().await;
        let slot = schedules
            .get_mut(&schedule.id)
            .ok_or(ScheduleError::NotFound { id: schedule.id })?;
        *slot = schedule.clone();
        Ok(())
    }

    async fn delete(&self, id: ScheduleId) -> Result<(), ScheduleError> {
        self.schedules
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ScheduleError::NotFound { id }.into())
    }

    async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let mut found: Vec<Schedule> = self
            .schedules
            .lock()
            .await
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        Ok(found)
    }

    async fn due(
        &self,
        tier: Option<CadenceTier>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        let mut due: Vec<Schedule> = self
            .schedules
            .lock()
            .await
            .values()
            .filter(|s| tier.is_none_or(|t| s.frequency == t))
            .filter(|s| s.should_run_at(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn advance(
        &self,
        schedule: &Schedule,
        previous_next_run: Option<DateTime<Utc>>,
    ) -> Result<bool, ScheduleError> {
        let mut schedules = self.schedules.lock().await;
        let stored = schedules
            .get_mut(&schedule.id)
            .ok_or(ScheduleError::NotFound { id: schedule.id })?;
        if stored.next_run_at != previous_next_run {
            return Ok(false);
        }
        stored.next_run_at = schedule.next_run_at;
        stored.last_run_at = schedule.last_run_at;
        stored.updated_at = schedule.updated_at;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn due_schedule(expr: &str, overdue_by: Duration) -> Schedule {
        let mut schedule = Schedule::new(WorkflowId::new(), expr, None).expect("schedule");
        schedule.next_run_at = Some(Utc::now() - overdue_by);
        schedule
    }

    #[tokio::test]
    async fn due_filters_by_tier_and_orders_oldest_first() {
        let store = InMemoryScheduleStore::new();
        let daily_old = due_schedule("0 9 * * *", Duration::minutes(30));
        let daily_new = due_schedule("0 10 * * *", Duration::minutes(5));
        let frequent = due_schedule("*/5 * * * *", Duration::minutes(1));
        let mut disabled = due_schedule("0 11 * * *", Duration::minutes(10));
        disabled.enabled = false;
        for s in [&daily_new, &daily_old, &frequent, &disabled] {
            store.insert(s.clone()).await.expect("insert");
        }

        let daily = store
            .due(Some(CadenceTier::Daily), Utc::now(), 10)
            .await
            .expect("due");
        assert_eq!(
            daily.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![daily_old.id, daily_new.id]
        );

        let all = store.due(None, Utc::now(), 2).await.expect("due");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn advance_is_a_conditional_claim() {
        let store = InMemoryScheduleStore::new();
        let schedule = due_schedule("0 9 * * *", Duration::minutes(1));
        let previous = schedule.next_run_at;
        store.insert(schedule.clone()).await.expect("insert");

        let mut fired = schedule.clone();
        fired.advance(Utc::now()).expect("advance");

        assert!(store.advance(&fired, previous).await.expect("claim"));
        assert!(!store.advance(&fired, previous).await.expect("second claim"));
        assert_eq!(
            store.get(schedule.id).await.expect("get").next_run_at,
            fired.next_run_at
        );
    }

    #[tokio::test]
    async fn missing_schedule_is_not_found() {
        let store = InMemoryScheduleStore::new();
        let err = store.get(ScheduleId::new()).await.expect_err("missing");
        assert!(matches!(err.current_context(), ScheduleError::NotFound { .. }));
    }
}
