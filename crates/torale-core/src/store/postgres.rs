//! Postgres-backed `TaskStore`, following the `Arc<Mutex<PgConnection>>`
//! shape of the teacher's `scheduler.rs`/`storage.rs`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{NewLastKnownState, TaskStore};
use crate::domain::{
    DeliveryRecord, DeliveryStatus, Execution, ExecutionResult, ExecutionStatus, GroundingSource,
    NewTask, NotifyBehavior, Task, TaskFilter, TaskPatch,
};
use crate::error::CoreError;
use crate::schema::{delivery_records, executions, tasks};

fn lock_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::StorageUnavailable(format!("connection lock poisoned: {e}"))
}

fn db_err(e: diesel::result::Error) -> CoreError {
    CoreError::StorageUnavailable(e.to_string())
}

pub struct PgTaskStore {
    conn: Arc<Mutex<PgConnection>>,
}

impl PgTaskStore {
    pub fn connect(database_url: &str) -> Result<Self, CoreError> {
        let conn = PgConnection::establish(database_url)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<PgConnection>>) -> Self {
        Self { conn }
    }
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTaskRow<'a> {
    id: Uuid,
    user_id: &'a str,
    name: &'a str,
    schedule: &'a str,
    search_query: &'a str,
    condition_description: &'a str,
    notify_behavior: &'a str,
    config: serde_json::Value,
    is_active: bool,
}

#[derive(Queryable, Debug)]
struct TaskRow {
    id: Uuid,
    user_id: String,
    name: String,
    schedule: String,
    search_query: String,
    condition_description: String,
    notify_behavior: String,
    config: serde_json::Value,
    is_active: bool,
    last_execution_id: Option<Uuid>,
    last_known_state: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let notify_behavior = NotifyBehavior::from_str(&row.notify_behavior)?;
        let config = match row.config {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
        Ok(Task {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            schedule: row.schedule,
            search_query: row.search_query,
            condition_description: row.condition_description,
            notify_behavior,
            config,
            is_active: row.is_active,
            last_execution_id: row.last_execution_id,
            last_known_state: row.last_known_state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = executions)]
struct NewExecutionRow {
    id: Uuid,
    task_id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    answer: Option<String>,
    evaluation: Option<String>,
    current_state: Option<serde_json::Value>,
    condition_met: Option<bool>,
    change_summary: Option<String>,
    grounding_sources: serde_json::Value,
    error_message: Option<String>,
}

#[derive(Queryable, Debug)]
struct ExecutionRow {
    id: Uuid,
    task_id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    answer: Option<String>,
    evaluation: Option<String>,
    current_state: Option<serde_json::Value>,
    condition_met: Option<bool>,
    change_summary: Option<String>,
    grounding_sources: serde_json::Value,
    error_message: Option<String>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = CoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let status = ExecutionStatus::from_str(&row.status)?;
        let grounding_sources: Vec<GroundingSource> =
            serde_json::from_value(row.grounding_sources).unwrap_or_default();
        let result = match (row.answer, row.current_state) {
            (Some(answer), Some(current_state)) => Some(ExecutionResult {
                answer,
                evaluation: row.evaluation.unwrap_or_default(),
                current_state,
            }),
            _ => None,
        };
        Ok(Execution {
            id: row.id,
            task_id: row.task_id,
            status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            result,
            condition_met: row.condition_met,
            change_summary: row.change_summary,
            grounding_sources,
            error_message: row.error_message,
        })
    }
}

fn new_execution_row(execution: &Execution) -> NewExecutionRow {
    NewExecutionRow {
        id: execution.id,
        task_id: execution.task_id,
        status: execution.status.as_str().to_string(),
        started_at: execution.started_at,
        completed_at: execution.completed_at,
        answer: execution.result.as_ref().map(|r| r.answer.clone()),
        evaluation: execution.result.as_ref().map(|r| r.evaluation.clone()),
        current_state: execution.result.as_ref().map(|r| r.current_state.clone()),
        condition_met: execution.condition_met,
        change_summary: execution.change_summary.clone(),
        grounding_sources: serde_json::to_value(&execution.grounding_sources)
            .unwrap_or(serde_json::Value::Array(Vec::new())),
        error_message: execution.error_message.clone(),
    }
}

#[derive(Insertable)]
#[diesel(table_name = delivery_records)]
struct NewDeliveryRow<'a> {
    id: Uuid,
    execution_id: Uuid,
    channel: &'a str,
    status: &'a str,
}

#[derive(Queryable, Debug)]
struct DeliveryRow {
    id: Uuid,
    execution_id: Uuid,
    channel: String,
    status: String,
    delivered_at: Option<DateTime<Utc>>,
    provider_message_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = CoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(DeliveryRecord {
            id: row.id,
            execution_id: row.execution_id,
            channel: row.channel,
            status: DeliveryStatus::from_str(&row.status)?,
            delivered_at: row.delivered_at,
            provider_message_id: row.provider_message_id,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create_task(&self, task: NewTask) -> Result<Task, CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        let id = Uuid::new_v4();
        let config_value = serde_json::Value::Object(task.config.into_iter().collect());
        let new_row = NewTaskRow {
            id,
            user_id: &task.user_id,
            name: &task.name,
            schedule: &task.schedule,
            search_query: &task.search_query,
            condition_description: &task.condition_description,
            notify_behavior: task.notify_behavior.as_str(),
            config: config_value,
            is_active: true,
        };

        diesel::insert_into(tasks::table)
            .values(&new_row)
            .execute(&mut *conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation,
                    _,
                ) => CoreError::AlreadyExists(format!("task {id}")),
                other => db_err(other),
            })?;

        let row: TaskRow = tasks::table
            .filter(tasks::id.eq(id))
            .first(&mut *conn)
            .map_err(db_err)?;

        Task::try_from(row)
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        let row: Option<TaskRow> = tasks::table
            .filter(tasks::id.eq(id))
            .first(&mut *conn)
            .optional()
            .map_err(db_err)?;

        match row {
            Some(row) => Task::try_from(row),
            None => Err(CoreError::NotFound(format!("task {id}"))),
        }
    }

    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> Result<Task, CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        conn.transaction(|conn| {
            let existing: TaskRow = tasks::table
                .filter(tasks::id.eq(id))
                .first(conn)
                .optional()?
                .ok_or(diesel::result::Error::NotFound)?;

            let name = patch.name.unwrap_or(existing.name);
            let schedule = patch.schedule.unwrap_or(existing.schedule);
            let search_query = patch.search_query.unwrap_or(existing.search_query);
            let condition_description = patch
                .condition_description
                .unwrap_or(existing.condition_description);
            let notify_behavior = patch
                .notify_behavior
                .map(|b| b.as_str().to_string())
                .unwrap_or(existing.notify_behavior);
            let config = patch
                .config
                .map(|c| serde_json::Value::Object(c.into_iter().collect()))
                .unwrap_or(existing.config);
            let is_active = patch.is_active.unwrap_or(existing.is_active);

            diesel::update(tasks::table.filter(tasks::id.eq(id)))
                .set((
                    tasks::name.eq(name),
                    tasks::schedule.eq(schedule),
                    tasks::search_query.eq(search_query),
                    tasks::condition_description.eq(condition_description),
                    tasks::notify_behavior.eq(notify_behavior),
                    tasks::config.eq(config),
                    tasks::is_active.eq(is_active),
                    tasks::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            tasks::table.filter(tasks::id.eq(id)).first(conn)
        })
        .map_err(|e| match e {
            diesel::result::Error::NotFound => CoreError::NotFound(format!("task {id}")),
            other => db_err(other),
        })
        .and_then(Task::try_from)
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        diesel::delete(tasks::table.filter(tasks::id.eq(id)))
            .execute(&mut *conn)
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        let mut query = tasks::table.into_boxed();
        if let Some(user_id) = filter.user_id {
            query = query.filter(tasks::user_id.eq(user_id));
        }
        if let Some(is_active) = filter.is_active {
            query = query.filter(tasks::is_active.eq(is_active));
        }

        let rows: Vec<TaskRow> = query
            .order(tasks::created_at.desc())
            .load(&mut *conn)
            .map_err(db_err)?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn record_execution(
        &self,
        execution: Execution,
        new_last_known_state: Option<NewLastKnownState>,
    ) -> Result<(), CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;
        let row = new_execution_row(&execution);

        conn.transaction(|conn| {
            // `CreateExecutionPending` inserts this row; `PersistResult` calls
            // back in with the same id to write the terminal state (spec.md
            // §4.5) — upsert so the second call updates in place instead of
            // colliding with the primary key.
            diesel::insert_into(executions::table)
                .values(&row)
                .on_conflict(executions::id)
                .do_update()
                .set((
                    executions::status.eq(&row.status),
                    executions::completed_at.eq(row.completed_at),
                    executions::answer.eq(&row.answer),
                    executions::evaluation.eq(&row.evaluation),
                    executions::current_state.eq(&row.current_state),
                    executions::condition_met.eq(row.condition_met),
                    executions::change_summary.eq(&row.change_summary),
                    executions::grounding_sources.eq(&row.grounding_sources),
                    executions::error_message.eq(&row.error_message),
                ))
                .execute(conn)?;

            if let Some(update) = &new_last_known_state {
                diesel::update(tasks::table.filter(tasks::id.eq(execution.task_id)))
                    .set((
                        tasks::last_execution_id.eq(update.execution_id),
                        tasks::last_known_state.eq(update.current_state.clone()),
                        tasks::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;
            }

            Ok::<_, diesel::result::Error>(())
        })
        .map_err(db_err)
    }

    async fn list_executions(
        &self,
        task_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Execution>, CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        let rows: Vec<ExecutionRow> = executions::table
            .filter(executions::task_id.eq(task_id))
            .order(executions::started_at.desc())
            .limit(limit)
            .load(&mut *conn)
            .map_err(db_err)?;

        rows.into_iter().map(Execution::try_from).collect()
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        let existing: Option<DeliveryRow> = delivery_records::table
            .filter(delivery_records::execution_id.eq(record.execution_id))
            .filter(delivery_records::channel.eq(&record.channel))
            .first(&mut *conn)
            .optional()
            .map_err(db_err)?;

        match existing.map(|r| DeliveryStatus::from_str(&r.status)).transpose()? {
            Some(DeliveryStatus::Delivered) => return Err(CoreError::AlreadyDelivered),
            // A prior attempt got as far as inserting its pending/failed row
            // but crashed before `finalize_delivery` (spec.md §8 S5 replay
            // window) — resume onto that row rather than re-insert and
            // collide with the `(execution_id, channel)` unique index.
            Some(DeliveryStatus::Pending) | Some(DeliveryStatus::Failed) => return Ok(()),
            None => {}
        }

        let row = NewDeliveryRow {
            id: record.id,
            execution_id: record.execution_id,
            channel: &record.channel,
            status: record.status.as_str(),
        };

        diesel::insert_into(delivery_records::table)
            .values(&row)
            .execute(&mut *conn)
            .map_err(db_err)?;

        Ok(())
    }

    async fn finalize_delivery(
        &self,
        execution_id: Uuid,
        channel: &str,
        status: DeliveryStatus,
        provider_message_id: Option<String>,
    ) -> Result<(), CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        diesel::update(
            delivery_records::table
                .filter(delivery_records::execution_id.eq(execution_id))
                .filter(delivery_records::channel.eq(channel)),
        )
        .set((
            delivery_records::status.eq(status.as_str()),
            delivery_records::delivered_at.eq(Utc::now()),
            delivery_records::provider_message_id.eq(provider_message_id),
        ))
        .execute(&mut *conn)
        .map_err(db_err)?;

        Ok(())
    }

    async fn count_delivered(&self, task_id: Uuid, channel: &str) -> Result<i64, CoreError> {
        let mut conn = self.conn.lock().map_err(lock_err)?;

        executions::table
            .inner_join(
                delivery_records::table.on(delivery_records::execution_id.eq(executions::id)),
            )
            .filter(executions::task_id.eq(task_id))
            .filter(delivery_records::channel.eq(channel))
            .filter(delivery_records::status.eq(DeliveryStatus::Delivered.as_str()))
            .count()
            .get_result(&mut *conn)
            .map_err(db_err)
    }
}
