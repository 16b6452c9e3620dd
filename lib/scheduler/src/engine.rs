//! Schedule bookkeeping and dispatch.
//!
//! [`ScheduleEngine`] owns the rules around schedules: at most one enabled
//! schedule per workflow, cadence-tiered selection of due schedules, and
//! advancing `next_run_at` after every fire. Running a workflow is delegated
//! to a [`WorkflowExecutor`].

use crate::error::{ExecutionError, ScheduleError};
use crate::schedule::{CadenceTier, Schedule, ScheduledExecution};
use crate::store::ScheduleStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsflow_core::{ExecutionId, Result, ScheduleId, WorkflowId};
use opsflow_workflow::{NodeConfig, NodeType, WorkflowNode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What an executor is asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub execution_id: ExecutionId,
    pub schedule_id: ScheduleId,
    pub workflow_id: WorkflowId,
    pub scheduled_for: DateTime<Utc>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl ExecutionRequest {
    #[must_use]
    pub fn for_execution(execution: &ScheduledExecution, attempt: u32) -> Self {
        Self {
            execution_id: execution.id,
            schedule_id: execution.schedule_id,
            workflow_id: execution.workflow_id,
            scheduled_for: execution.scheduled_for,
            attempt,
        }
    }
}

/// Runs workflows on behalf of schedules.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    /// Runs (or enqueues) one workflow execution.
    async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutionError>;
}

/// Enabled schedules already bound to a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConflicts {
    pub workflow_id: WorkflowId,
    pub has_conflict: bool,
    pub schedules: Vec<Schedule>,
}

/// Outcome of one [`ScheduleEngine::execute_scheduled_workflows`] batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub succeeded: u32,
    pub failed: u32,
    pub advanced: u32,
}

/// Rules and dispatch for schedules.
#[derive(Clone)]
pub struct ScheduleEngine {
    store: Arc<dyn ScheduleStore>,
    executor: Arc<dyn WorkflowExecutor>,
}

impl ScheduleEngine {
    #[must_use]
    pub fn new(store: Arc<dyn ScheduleStore>, executor: Arc<dyn WorkflowExecutor>) -> Self {
        Self { store, executor }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    /// Reports the enabled schedules already bound to a workflow.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn check_schedule_conflicts(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<ScheduleConflicts, ScheduleError> {
        let schedules: Vec<Schedule> = self
            .store
            .list_for_workflow(workflow_id)
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect();

        Ok(ScheduleConflicts {
            workflow_id,
            has_conflict: !schedules.is_empty(),
            schedules,
        })
    }

    /// Creates an enabled schedule for a workflow.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the workflow already has an enabled schedule,
    /// or the cron/timezone error if the expression does not evaluate.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn create_schedule(
        &self,
        workflow_id: WorkflowId,
        cron_expression: &str,
        timezone: Option<&str>,
    ) -> Result<Schedule, ScheduleError> {
        let schedule = Schedule::new(workflow_id, cron_expression, timezone)?;
        self.insert_enabled(schedule).await
    }

    async fn insert_enabled(&self, schedule: Schedule) -> Result<Schedule, ScheduleError> {
        self.refuse_conflict(schedule.workflow_id, None).await?;
        self.store.insert(schedule.clone()).await?;

        info!(
            schedule_id = %schedule.id,
            frequency = schedule.frequency.as_str(),
            next_run_at = ?schedule.next_run_at,
            "schedule created"
        );
        Ok(schedule)
    }

    /// Creates a schedule from a Schedule node's configuration.
    ///
    /// A node with `isActive: false` produces a disabled schedule, which never
    /// conflicts. The node's `startAt`/`endAt` bound when the schedule fires.
    ///
    /// # Errors
    ///
    /// Returns `InvalidScheduleNode` if the node is not a Schedule node or has
    /// no cron expression, plus every error of [`create_schedule`](Self::create_schedule).
    pub async fn attach_schedule_node(
        &self,
        workflow_id: WorkflowId,
        node: &WorkflowNode,
    ) -> Result<Schedule, ScheduleError> {
        if node.node_type != NodeType::Schedule {
            return Err(ScheduleError::InvalidScheduleNode {
                reason: format!("node {} is a {} node", node.graph_id, node.node_type),
            }
            .into());
        }
        let config = match node.typed_config() {
            Ok(NodeConfig::Schedule(config)) => config,
            Ok(_) => {
                return Err(ScheduleError::InvalidScheduleNode {
                    reason: format!("node {} has no schedule configuration", node.graph_id),
                }
                .into());
            }
            Err(reason) => return Err(ScheduleError::InvalidScheduleNode { reason }.into()),
        };
        let cron = config
            .cron
            .as_deref()
            .ok_or_else(|| ScheduleError::InvalidScheduleNode {
                reason: format!("node {} has no cron expression", node.graph_id),
            })?;

        let now = Utc::now();
        let mut schedule = Schedule::new_at(workflow_id, cron, config.timezone.as_deref(), now)?
            .with_window(config.start_at, config.end_at, now)?;
        if schedule.next_run_at.is_none() {
            warn!(graph_id = %node.graph_id, "schedule window has already closed");
        }
        if config.is_active() {
            return self.insert_enabled(schedule).await;
        }

        schedule.enabled = false;
        self.store.insert(schedule.clone()).await?;
        debug!(schedule_id = %schedule.id, "inactive schedule node attached");
        Ok(schedule)
    }

    /// Enables or disables a schedule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or `Conflict` when enabling would give the
    /// workflow a second enabled schedule.
    pub async fn set_enabled(
        &self,
        id: ScheduleId,
        enabled: bool,
    ) -> Result<Schedule, ScheduleError> {
        let mut schedule = self.store.get(id).await?;
        if enabled && !schedule.enabled {
            self.refuse_conflict(schedule.workflow_id, Some(id)).await?;
        }
        schedule.set_enabled(enabled, Utc::now())?;
        self.store.update(&schedule).await?;
        info!(schedule_id = %id, enabled, "schedule toggled");
        Ok(schedule)
    }

    /// Deletes a schedule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such schedule exists.
    pub async fn delete_schedule(&self, id: ScheduleId) -> Result<(), ScheduleError> {
        self.store.delete(id).await?;
        info!(schedule_id = %id, "schedule deleted");
        Ok(())
    }

    /// Due schedules of one tier, or of every tier when `tier` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn due_schedules(
        &self,
        tier: Option<CadenceTier>,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        self.store.due(tier, Utc::now(), limit).await
    }

    /// Due schedules that fire more often than daily.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn process_frequent_schedules(
        &self,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        self.due_schedules(Some(CadenceTier::Frequent), limit).await
    }

    /// Due daily schedules.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn process_daily_schedules(
        &self,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        self.due_schedules(Some(CadenceTier::Daily), limit).await
    }

    /// Due weekly schedules.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn process_weekly_schedules(
        &self,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        self.due_schedules(Some(CadenceTier::Weekly), limit).await
    }

    /// Due monthly schedules.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn process_monthly_schedules(
        &self,
        limit: usize,
    ) -> Result<Vec<Schedule>, ScheduleError> {
        self.due_schedules(Some(CadenceTier::Monthly), limit).await
    }

    /// Runs each schedule once and advances it, failed or not.
    ///
    /// Retries are the job's concern. This is the single-shot dispatch path.
    ///
    /// # Errors
    ///
    /// Returns a storage error from advancing a schedule.
    pub async fn execute_scheduled_workflows(
        &self,
        schedules: Vec<Schedule>,
    ) -> Result<DispatchSummary, ScheduleError> {
        let mut summary = DispatchSummary::default();

        for schedule in schedules {
            let mut execution = ScheduledExecution::for_schedule(&schedule, Utc::now());
            execution.start(Utc::now());
            execution.record_attempt();

            match self.execute_attempt(&execution, 1).await {
                Ok(()) => {
                    execution.complete(Utc::now());
                    summary.succeeded += 1;
                }
                Err(err) => {
                    execution.fail(Utc::now(), err.to_string());
                    summary.failed += 1;
                }
            }

            if self.advance_schedule(&schedule, Utc::now()).await? {
                summary.advanced += 1;
            }
        }

        Ok(summary)
    }

    /// Makes one attempt at running a scheduled execution.
    ///
    /// # Errors
    ///
    /// Returns whatever the executor returns.
    pub async fn execute_attempt(
        &self,
        execution: &ScheduledExecution,
        attempt: u32,
    ) -> Result<(), ExecutionError> {
        let request = ExecutionRequest::for_execution(execution, attempt);
        debug!(
            schedule_id = %request.schedule_id,
            workflow_id = %request.workflow_id,
            attempt,
            "dispatching workflow"
        );
        self.executor.execute(&request).await
    }

    /// Records a fire at `now` and persists the next run.
    ///
    /// Returns `false` if another writer already advanced the schedule. A
    /// schedule whose expression no longer evaluates is parked with no next
    /// run so it stops coming due.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn advance_schedule(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        let previous = schedule.next_run_at;
        let mut fired = schedule.clone();

        match fired.advance(now) {
            Ok(()) if fired.next_run_at.is_none() => {
                info!(schedule_id = %schedule.id, end_at = ?schedule.end_at, "schedule window closed");
            }
            Ok(()) => {}
            Err(err) => {
                error!(schedule_id = %schedule.id, error = %err, "cannot compute next run, parking schedule");
                fired.last_run_at = Some(now);
                fired.next_run_at = None;
                fired.updated_at = now;
            }
        }

        let claimed = self.store.advance(&fired, previous).await?;
        if claimed {
            debug!(schedule_id = %schedule.id, next_run_at = ?fired.next_run_at, "schedule advanced");
        } else {
            warn!(schedule_id = %schedule.id, "schedule was advanced elsewhere");
        }
        Ok(claimed)
    }

    async fn refuse_conflict(
        &self,
        workflow_id: WorkflowId,
        except: Option<ScheduleId>,
    ) -> Result<(), ScheduleError> {
        let conflicts = self.check_schedule_conflicts(workflow_id).await?;
        match conflicts
            .schedules
            .iter()
            .find(|s| Some(s.id) != except)
        {
            Some(existing) => Err(ScheduleError::Conflict {
                workflow_id,
                existing: existing.id,
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryScheduleStore;
    use chrono::Duration;
    use opsflow_workflow::{GraphId, NodeDraft, Position};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        requests: Mutex<Vec<ExecutionRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl WorkflowExecutor for RecordingExecutor {
        async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutionError> {
            self.requests.lock().expect("lock").push(request.clone());
            if self.fail {
                return Err(ExecutionError::Failed {
                    workflow_id: request.workflow_id,
                    reason: "executor down".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    fn engine(fail: bool) -> (ScheduleEngine, Arc<InMemoryScheduleStore>, Arc<RecordingExecutor>) {
        let store = Arc::new(InMemoryScheduleStore::new());
        let executor = Arc::new(RecordingExecutor {
            fail,
            ..Default::default()
        });
        (ScheduleEngine::new(store.clone(), executor.clone()), store, executor)
    }

    async fn make_due(store: &InMemoryScheduleStore, schedule: &Schedule) -> Schedule {
        let mut due = schedule.clone();
        due.next_run_at = Some(Utc::now() - Duration::minutes(1));
        store.update(&due).await.expect("update");
        due
    }

    #[tokio::test]
    async fn second_enabled_schedule_is_a_conflict() {
        let (engine, _, _) = engine(false);
        let workflow_id = WorkflowId::new();
        let first = engine
            .create_schedule(workflow_id, "0 9 * * *", None)
            .await
            .expect("create");

        let conflicts = engine
            .check_schedule_conflicts(workflow_id)
            .await
            .expect("check");
        assert!(conflicts.has_conflict);
        assert_eq!(conflicts.schedules[0].id, first.id);

        let err = engine
            .create_schedule(workflow_id, "0 10 * * *", None)
            .await
            .expect_err("conflict");
        assert!(matches!(
            err.current_context(),
            ScheduleError::Conflict { existing, .. } if *existing == first.id
        ));

        engine.set_enabled(first.id, false).await.expect("disable");
        engine
            .create_schedule(workflow_id, "0 10 * * *", None)
            .await
            .expect("create after disabling");
        assert!(engine.set_enabled(first.id, true).await.is_err());
    }

    #[tokio::test]
    async fn execute_advances_even_when_execution_fails() {
        let (engine, store, executor) = engine(true);
        let schedule = engine
            .create_schedule(WorkflowId::new(), "0 9 * * *", None)
            .await
            .expect("create");
        let due = make_due(&store, &schedule).await;

        let picked = engine.process_daily_schedules(10).await.expect("due");
        assert_eq!(picked.len(), 1);

        let summary = engine
            .execute_scheduled_workflows(picked)
            .await
            .expect("execute");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.advanced, 1);
        assert_eq!(executor.requests.lock().expect("lock").len(), 1);

        let stored = store.get(due.id).await.expect("get");
        assert!(stored.next_run_at > Some(Utc::now()));
        assert!(stored.last_run_at.is_some());
        assert!(!stored.should_run_now());
    }

    #[tokio::test]
    async fn tiers_select_only_their_schedules() {
        let (engine, store, _) = engine(false);
        let daily = engine
            .create_schedule(WorkflowId::new(), "0 9 * * *", None)
            .await
            .expect("create");
        let frequent = engine
            .create_schedule(WorkflowId::new(), "*/5 * * * *", None)
            .await
            .expect("create");
        make_due(&store, &daily).await;
        make_due(&store, &frequent).await;

        let picked = engine.process_frequent_schedules(10).await.expect("due");
        assert_eq!(picked.iter().map(|s| s.id).collect::<Vec<_>>(), vec![frequent.id]);
        assert!(engine.process_weekly_schedules(10).await.expect("due").is_empty());
        assert!(engine.process_monthly_schedules(10).await.expect("due").is_empty());
    }

    #[tokio::test]
    async fn schedule_node_attaches_with_its_config() {
        let (engine, _, _) = engine(false);
        let config = json!({"cron": "0 8 * * 1", "timezone": "Europe/Berlin", "isActive": false});
        let node = WorkflowNode::from_draft(
            GraphId::new("node_sched"),
            NodeDraft::new(NodeType::Schedule, "Weekly report")
                .with_configuration(config.as_object().cloned().unwrap_or_default()),
            Position::default(),
        );

        let schedule = engine
            .attach_schedule_node(WorkflowId::new(), &node)
            .await
            .expect("attach");

        assert_eq!(schedule.timezone, "Europe/Berlin");
        assert_eq!(schedule.frequency, CadenceTier::Weekly);
        assert!(!schedule.enabled);
    }

    fn schedule_node(config: serde_json::Value) -> WorkflowNode {
        WorkflowNode::from_draft(
            GraphId::new("node_window"),
            NodeDraft::new(NodeType::Schedule, "Windowed")
                .with_configuration(config.as_object().cloned().unwrap_or_default()),
            Position::default(),
        )
    }

    #[tokio::test]
    async fn schedule_node_window_bounds_the_first_run() {
        let (engine, _, _) = engine(false);
        let node = schedule_node(json!({"cron": "0 9 * * *", "startAt": "2030-01-01T00:00:00Z"}));

        let schedule = engine
            .attach_schedule_node(WorkflowId::new(), &node)
            .await
            .expect("attach");

        assert!(schedule.enabled);
        assert_eq!(schedule.start_at.map(|t| t.to_rfc3339()).as_deref(), Some("2030-01-01T00:00:00+00:00"));
        assert_eq!(
            schedule.next_run_at.map(|t| t.to_rfc3339()).as_deref(),
            Some("2030-01-01T09:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn ended_schedule_node_window_never_comes_due() {
        let (engine, store, _) = engine(false);
        let node = schedule_node(json!({
            "cron": "*/5 * * * *",
            "startAt": "2019-01-01T00:00:00Z",
            "endAt": "2020-01-01T00:00:00Z"
        }));

        let schedule = engine
            .attach_schedule_node(WorkflowId::new(), &node)
            .await
            .expect("attach");

        assert_eq!(schedule.next_run_at, None);
        assert_eq!(store.get(schedule.id).await.expect("get").next_run_at, None);
        assert!(engine.due_schedules(None, 10).await.expect("due").is_empty());
    }

    #[tokio::test]
    async fn advancing_past_end_parks_the_schedule() {
        let (engine, store, _) = engine(false);
        let end_at = Utc::now() + Duration::seconds(90);
        let node = schedule_node(json!({"cron": "* * * * *", "endAt": end_at}));
        let schedule = engine
            .attach_schedule_node(WorkflowId::new(), &node)
            .await
            .expect("attach");
        assert!(schedule.next_run_at.is_some_and(|next| next <= end_at));
        let due = make_due(&store, &schedule).await;

        let claimed = engine
            .advance_schedule(&due, end_at + Duration::seconds(30))
            .await
            .expect("advance");

        assert!(claimed);
        let stored = store.get(due.id).await.expect("get");
        assert!(stored.last_run_at.is_some());
        assert_eq!(stored.next_run_at, None);
        assert!(engine.due_schedules(None, 10).await.expect("due").is_empty());
    }

    #[tokio::test]
    async fn non_schedule_node_is_rejected() {
        let (engine, _, _) = engine(false);
        let node = WorkflowNode::from_draft(
            GraphId::new("node_a"),
            NodeDraft::new(NodeType::Action, "Send"),
            Position::default(),
        );

        let err = engine
            .attach_schedule_node(WorkflowId::new(), &node)
            .await
            .expect_err("not a schedule node");
        assert!(matches!(
            err.current_context(),
            ScheduleError::InvalidScheduleNode { .. }
        ));
    }

    #[tokio::test]
    async fn delete_schedule_removes_it() {
        let (engine, store, _) = engine(false);
        let schedule = engine
            .create_schedule(WorkflowId::new(), "0 9 * * *", None)
            .await
            .expect("create");

        engine.delete_schedule(schedule.id).await.expect("delete");

        assert!(store.get(schedule.id).await.is_err());
        assert!(engine.delete_schedule(schedule.id).await.is_err());
    }
}
