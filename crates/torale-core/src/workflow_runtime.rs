//! WorkflowRuntime port (spec.md §4.7) plus an in-process implementation.
//!
//! The implementation follows the shape of the teacher's
//! `scheduler.rs::spawn_scheduler`: a durable, Postgres-backed table of due
//! work polled on an interval and handed off for processing. Unlike the
//! teacher's single-consumer channel, ticks here are dispatched onto
//! per-task `tokio::sync::Mutex` guards so that a new cron tick for a task
//! whose previous workflow is still running queues behind it rather than
//! running concurrently (spec.md §5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::clock::{next_fire, validate_cron};
use crate::error::CoreError;
use crate::schema::schedules;

#[async_trait]
pub trait WorkflowRuntime: Send + Sync {
    async fn register_schedule(&self, task_id: Uuid, cron_expr: &str) -> Result<(), CoreError>;
    async fn pause(&self, task_id: Uuid) -> Result<(), CoreError>;
    async fn resume(&self, task_id: Uuid) -> Result<(), CoreError>;
    async fn unregister(&self, task_id: Uuid) -> Result<(), CoreError>;
    /// Out-of-band invocation of the same workflow body (spec.md §4.7). The
    /// suppress flag threads through to the workflow's `Deliver` activity
    /// (spec.md §4.5); the `NotifyDecision` is still computed and logged.
    async fn run_now(&self, task_id: Uuid, suppress_notifications: bool) -> Result<Uuid, CoreError>;

    /// Read-only view of the runtime's own paused/registered state for
    /// `task_id`, used by `TaskService::reconcile_schedule_state`
    /// (SPEC_FULL.md). `None` means the task isn't registered at all.
    async fn is_paused(&self, task_id: Uuid) -> Result<Option<bool>, CoreError>;
}

/// What the runtime invokes on every fire — `TaskWorkflow::run`, kept behind
/// a trait so the runtime doesn't need to know about the store/executor
/// wiring.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(&self, task_id: Uuid, suppress_notifications: bool) -> Result<Uuid, CoreError>;
}

#[derive(Queryable, Debug, Clone)]
struct ScheduleRow {
    task_id: Uuid,
    cron_expression: String,
    paused: bool,
    #[allow(dead_code)]
    next_fire_at: Option<DateTime<Utc>>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = schedules)]
struct NewScheduleRow<'a> {
    task_id: Uuid,
    cron_expression: &'a str,
    paused: bool,
    next_fire_at: Option<DateTime<Utc>>,
}

/// Durable store for the runtime's own view of each task's schedule
/// (spec.md §6, the `schedules` side-table).
pub struct SchedulesDb {
    conn: Arc<StdMutex<PgConnection>>,
}

impl SchedulesDb {
    pub fn connect(database_url: &str) -> Result<Self, CoreError> {
        let conn = PgConnection::establish(database_url)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<StdMutex<PgConnection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PgConnection>, CoreError> {
        self.conn
            .lock()
            .map_err(|e| CoreError::StorageUnavailable(format!("connection lock poisoned: {e}")))
    }

    pub fn register(&self, task_id: Uuid, cron_expr: &str) -> Result<(), CoreError> {
        let next = next_fire(cron_expr, Utc::now())?;
        let mut conn = self.lock()?;

        diesel::insert_into(schedules::table)
            .values(&NewScheduleRow {
                task_id,
                cron_expression: cron_expr,
                paused: false,
                next_fire_at: Some(next),
            })
            .on_conflict(schedules::task_id)
            .do_update()
            .set((
                schedules::cron_expression.eq(cron_expr),
                schedules::paused.eq(false),
                schedules::next_fire_at.eq(Some(next)),
                schedules::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    pub fn set_paused(&self, task_id: Uuid, paused: bool) -> Result<(), CoreError> {
        let mut conn = self.lock()?;
        diesel::update(schedules::table.filter(schedules::task_id.eq(task_id)))
            .set((schedules::paused.eq(paused), schedules::updated_at.eq(Utc::now())))
            .execute(&mut *conn)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    pub fn unregister(&self, task_id: Uuid) -> Result<(), CoreError> {
        let mut conn = self.lock()?;
        diesel::delete(schedules::table.filter(schedules::task_id.eq(task_id)))
            .execute(&mut *conn)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, String)>, CoreError> {
        let mut conn = self.lock()?;
        let rows: Vec<ScheduleRow> = schedules::table
            .filter(schedules::paused.eq(false))
            .filter(schedules::next_fire_at.le(now))
            .load(&mut *conn)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(rows.into_iter().map(|r| (r.task_id, r.cron_expression)).collect())
    }

    pub fn advance(&self, task_id: Uuid, cron_expr: &str, after: DateTime<Utc>) -> Result<(), CoreError> {
        let next = next_fire(cron_expr, after)?;
        let mut conn = self.lock()?;
        diesel::update(schedules::table.filter(schedules::task_id.eq(task_id)))
            .set((
                schedules::next_fire_at.eq(Some(next)),
                schedules::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Read-only view used by `TaskService::reconcile_schedule_state`.
    pub fn is_paused(&self, task_id: Uuid) -> Result<Option<bool>, CoreError> {
        let mut conn = self.lock()?;
        let row: Option<ScheduleRow> = schedules::table
            .filter(schedules::task_id.eq(task_id))
            .first(&mut *conn)
            .optional()
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(row.map(|r| r.paused))
    }
}

/// A single tokio task, background-polling `SchedulesDb` and dispatching due
/// work onto per-task locks.
pub struct InProcessWorkflowRuntime {
    schedules: Arc<SchedulesDb>,
    runner: Arc<dyn WorkflowRunner>,
    locks: StdMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    poll_interval: Duration,
}

impl InProcessWorkflowRuntime {
    pub fn new(
        schedules: Arc<SchedulesDb>,
        runner: Arc<dyn WorkflowRunner>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            schedules,
            runner,
            locks: StdMutex::new(HashMap::new()),
            poll_interval,
        })
    }

    fn task_lock(&self, task_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(task_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Spawn the background polling loop. The returned handle is owned by
    /// the caller (typically dropped only at process shutdown).
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.poll_interval);
            loop {
                interval.tick().await;

                let due = match this.schedules.due(Utc::now()) {
                    Ok(due) => due,
                    Err(e) => {
                        tracing::error!("failed to poll due schedules: {e}");
                        continue;
                    }
                };

                for (task_id, cron_expr) in due {
                    // Advance immediately so a slow workflow doesn't cause a
                    // storm of re-fires once it finally finishes.
                    if let Err(e) = this.schedules.advance(task_id, &cron_expr, Utc::now()) {
                        tracing::error!("failed to advance schedule for {task_id}: {e}");
                        continue;
                    }

                    let lock = this.task_lock(task_id);
                    let runner = this.runner.clone();
                    tokio::spawn(async move {
                        let _guard = lock.lock().await;
                        tracing::debug!(task_id = %task_id, "cron tick fired");
                        if let Err(e) = runner.run(task_id, false).await {
                            tracing::error!(task_id = %task_id, "workflow run failed: {e}");
                        }
                    });
                }
            }
        })
    }
}

#[async_trait]
impl WorkflowRuntime for InProcessWorkflowRuntime {
    async fn register_schedule(&self, task_id: Uuid, cron_expr: &str) -> Result<(), CoreError> {
        validate_cron(cron_expr)?;
        self.schedules.register(task_id, cron_expr)
    }

    async fn pause(&self, task_id: Uuid) -> Result<(), CoreError> {
        self.schedules.set_paused(task_id, true)
    }

    async fn resume(&self, task_id: Uuid) -> Result<(), CoreError> {
        self.schedules.set_paused(task_id, false)
    }

    async fn unregister(&self, task_id: Uuid) -> Result<(), CoreError> {
        self.schedules.unregister(task_id)
    }

    async fn run_now(&self, task_id: Uuid, suppress_notifications: bool) -> Result<Uuid, CoreError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;
        self.runner.run(task_id, suppress_notifications).await
    }

    async fn is_paused(&self, task_id: Uuid) -> Result<Option<bool>, CoreError> {
        self.schedules.is_paused(task_id)
    }
}
