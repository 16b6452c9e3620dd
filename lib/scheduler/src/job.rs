//! Background scheduler job.
//!
//! The job polls for due schedules on a fixed interval and runs each one as
//! an independent unit of work. At most `max_concurrent_executions` units run
//! at once. The rest wait for a permit and are counted in `queue_size`.
//! A unit retries its execution with a flat delay, then advances the
//! schedule whether or not the execution succeeded.
//!
//! Each job owns its queue, permits and stats. Nothing is process-global.

use crate::engine::ScheduleEngine;
use crate::error::SchedulerError;
use crate::schedule::{CadenceTier, Schedule, ScheduledExecution};
use chrono::Utc;
use opsflow_core::{Result, ScheduleId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the scheduler job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerJobConfig {
    /// Poll period.
    pub interval_ms: u64,
    /// Concurrency cap for running executions.
    pub max_concurrent_executions: usize,
    /// Retries after the first failed attempt.
    pub retry_attempts: u32,
    /// Flat delay between attempts.
    pub retry_delay_ms: u64,
    /// Maximum schedules collected per tier per tick.
    pub batch_size: usize,
    pub daily_check_interval_ms: u64,
    pub weekly_check_interval_ms: u64,
    pub monthly_check_interval_ms: u64,
}

impl Default for SchedulerJobConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            max_concurrent_executions: 5,
            retry_attempts: 3,
            retry_delay_ms: 5_000,
            batch_size: 100,
            daily_check_interval_ms: 5 * 60_000,
            weekly_check_interval_ms: 15 * 60_000,
            monthly_check_interval_ms: 60 * 60_000,
        }
    }
}

impl SchedulerJobConfig {
    fn check_interval(&self, tier: CadenceTier) -> Duration {
        let ms = match tier {
            CadenceTier::Frequent => 0,
            CadenceTier::Daily => self.daily_check_interval_ms,
            CadenceTier::Weekly => self.weekly_check_interval_ms,
            CadenceTier::Monthly => self.monthly_check_interval_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Cumulative execution counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    /// Mean unit duration in milliseconds, retries included.
    pub average_duration: f64,
}

impl SchedulerStats {
    fn record(&mut self, success: bool, elapsed: Duration) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.average_duration += (ms - self.average_duration) / self.total_executions as f64;
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub queue_size: usize,
    pub stats: SchedulerStats,
}

struct Shared {
    engine: ScheduleEngine,
    config: SchedulerJobConfig,
    permits: Arc<Semaphore>,
    /// Units waiting for a permit.
    queue_size: AtomicUsize,
    /// Units spawned and not yet finished.
    active: AtomicUsize,
    idle: Notify,
    in_flight: Mutex<HashSet<ScheduleId>>,
    stats: Mutex<SchedulerStats>,
    last_checked: Mutex<HashMap<CadenceTier, Instant>>,
    ticks: AtomicU64,
}

struct Runner {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A timer-driven poller that dispatches due schedules.
pub struct SchedulerJob {
    shared: Arc<Shared>,
    runner: Mutex<Option<Runner>>,
}

impl SchedulerJob {
    #[must_use]
    pub fn new(engine: ScheduleEngine, config: SchedulerJobConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions.max(1)));
        Self {
            shared: Arc::new(Shared {
                engine,
                config,
                permits,
                queue_size: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
                in_flight: Mutex::new(HashSet::new()),
                stats: Mutex::new(SchedulerStats::default()),
                last_checked: Mutex::new(HashMap::new()),
                ticks: AtomicU64::new(0),
            }),
            runner: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerJobConfig {
        &self.shared.config
    }

    /// Starts the poll loop. Does nothing if it is already running.
    ///
    /// The first poll happens immediately. Must be called inside a tokio
    /// runtime.
    pub fn start(&self) {
        let mut runner = lock(&self.runner);
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("scheduler job already running");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.shared), cancel.clone()));
        *runner = Some(Runner { cancel, handle });
    }

    /// Stops the poll loop and waits for it to exit.
    ///
    /// Units already dispatched keep running. Use [`wait_idle`](Self::wait_idle)
    /// to wait for them.
    pub async fn stop(&self) {
        let Some(runner) = lock(&self.runner).take() else {
            return;
        };
        runner.cancel.cancel();
        if let Err(err) = runner.handle.await {
            error!(error = %err, "scheduler loop ended abnormally");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.runner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Number of dispatched units waiting for a permit.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.shared.queue_size.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        *lock(&self.shared.stats)
    }

    /// Zeroes every counter.
    pub fn reset_stats(&self) {
        *lock(&self.shared.stats) = SchedulerStats::default();
        info!("scheduler stats reset");
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.is_running(),
            queue_size: self.queue_size(),
            stats: self.stats(),
        }
    }

    /// Number of polls performed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::SeqCst)
    }

    /// Runs one poll outside the timer and returns how many units it dispatched.
    ///
    /// # Errors
    ///
    /// Returns `PollFailed` if due schedules cannot be collected.
    pub async fn poll_once(&self) -> Result<usize, SchedulerError> {
        poll(&self.shared).await
    }

    /// Waits until every dispatched unit has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    info!(
        interval_ms = shared.config.interval_ms,
        max_concurrent_executions = shared.config.max_concurrent_executions,
        retry_attempts = shared.config.retry_attempts,
        "scheduler job started"
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(shared.config.interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = poll(&shared).await {
                    error!(error = %err, "scheduler poll failed");
                }
            }
        }
    }

    info!("scheduler job stopped");
}

async fn poll(shared: &Arc<Shared>) -> Result<usize, SchedulerError> {
    let tick = shared.ticks.fetch_add(1, Ordering::SeqCst) + 1;
    let mut dispatched = 0;

    for tier in tiers_to_check(shared, Instant::now()) {
        let limit = shared.config.batch_size;
        let due = match tier {
            CadenceTier::Frequent => shared.engine.process_frequent_schedules(limit).await,
            CadenceTier::Daily => shared.engine.process_daily_schedules(limit).await,
            CadenceTier::Weekly => shared.engine.process_weekly_schedules(limit).await,
            CadenceTier::Monthly => shared.engine.process_monthly_schedules(limit).await,
        }
        .map_err(|err| SchedulerError::PollFailed {
            reason: err.to_string(),
        })?;

        for schedule in due {
            if !lock(&shared.in_flight).insert(schedule.id) {
                debug!(schedule_id = %schedule.id, "schedule already queued or running");
                continue;
            }
            dispatch(shared, schedule);
            dispatched += 1;
        }
    }

    debug!(tick, dispatched, queue_size = shared.queue_size.load(Ordering::SeqCst), "scheduler tick");
    Ok(dispatched)
}

/// Frequent schedules are checked every tick. Slower tiers only once their
/// own check interval has passed.
fn tiers_to_check(shared: &Shared, now: Instant) -> Vec<CadenceTier> {
    let mut last_checked = lock(&shared.last_checked);
    [
        CadenceTier::Frequent,
        CadenceTier::Daily,
        CadenceTier::Weekly,
        CadenceTier::Monthly,
    ]
    .into_iter()
    .filter(|&tier| {
        let due = last_checked
            .get(&tier)
            .is_none_or(|&last| now.duration_since(last) >= shared.config.check_interval(tier));
        if due {
            last_checked.insert(tier, now);
        }
        due
    })
    .collect()
}

fn dispatch(shared: &Arc<Shared>, schedule: Schedule) {
    shared.queue_size.fetch_add(1, Ordering::SeqCst);
    shared.active.fetch_add(1, Ordering::SeqCst);

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let permit = Arc::clone(&shared.permits).acquire_owned().await;
        shared.queue_size.fetch_sub(1, Ordering::SeqCst);

        match permit {
            Ok(_permit) => run_unit(&shared, &schedule).await,
            Err(err) => error!(schedule_id = %schedule.id, error = %err, "worker pool closed"),
        }

        lock(&shared.in_flight).remove(&schedule.id);
        if shared.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            shared.idle.notify_waiters();
        }
    });
}

async fn run_unit(shared: &Shared, schedule: &Schedule) {
    let started = Instant::now();
    let mut execution = ScheduledExecution::for_schedule(schedule, Utc::now());
    execution.start(Utc::now());

    let max_attempts = shared.config.retry_attempts.saturating_add(1);
    let retry_delay = Duration::from_millis(shared.config.retry_delay_ms);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        execution.record_attempt();
        match shared.engine.execute_attempt(&execution, attempt).await {
            Ok(()) => {
                last_error = None;
                break;
            }
            Err(err) => {
                if attempt < max_attempts {
                    warn!(
                        schedule_id = %schedule.id,
                        attempt,
                        error = %err,
                        "scheduled execution failed, retrying"
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                last_error = Some(err.to_string());
            }
        }
    }

    let elapsed = started.elapsed();
    let succeeded = last_error.is_none();
    match last_error {
        None => {
            execution.complete(Utc::now());
            info!(
                schedule_id = %schedule.id,
                workflow_id = %schedule.workflow_id,
                attempts = execution.attempts,
                duration_ms = elapsed.as_millis() as u64,
                "scheduled workflow executed"
            );
        }
        Some(reason) => {
            let err = SchedulerError::RetriesExhausted {
                schedule_id: schedule.id,
                attempts: execution.attempts,
                reason: reason.clone(),
            };
            execution.fail(Utc::now(), reason);
            error!(workflow_id = %schedule.workflow_id, error = %err, "scheduled workflow failed");
        }
    }
    lock(&shared.stats).record(succeeded, elapsed);

    if let Err(err) = shared.engine.advance_schedule(schedule, Utc::now()).await {
        error!(schedule_id = %schedule.id, error = %err, "failed to advance schedule");
    }
}
