//! In-memory `TaskStore`, used to drive the workflow tests in spec.md §8
//! (S1–S6) without a real database. Not part of the teacher; grounded in the
//! store-trait-plus-double pattern used to unit-test repository layers
//! across the example pack.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{NewLastKnownState, TaskStore};
use crate::domain::{DeliveryRecord, DeliveryStatus, Execution, NewTask, Task, TaskFilter, TaskPatch};
use crate::error::CoreError;

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, Task>,
    executions: HashMap<Uuid, Execution>,
    deliveries: HashMap<(Uuid, String), DeliveryRecord>,
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: NewTask) -> Result<Task, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let stored = Task {
            id,
            user_id: task.user_id,
            name: task.name,
            schedule: task.schedule,
            search_query: task.search_query,
            condition_description: task.condition_description,
            notify_behavior: task.notify_behavior,
            config: task.config,
            is_active: true,
            last_execution_id: None,
            last_known_state: None,
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, CoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
    }

    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> Result<Task, CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;

        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(schedule) = patch.schedule {
            task.schedule = schedule;
        }
        if let Some(search_query) = patch.search_query {
            task.search_query = search_query;
        }
        if let Some(condition_description) = patch.condition_description {
            task.condition_description = condition_description;
        }
        if let Some(notify_behavior) = patch.notify_behavior {
            task.notify_behavior = notify_behavior;
        }
        if let Some(config) = patch.config {
            task.config = config;
        }
        if let Some(is_active) = patch.is_active {
            task.is_active = is_active;
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.tasks.remove(&id);
        Ok(())
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| {
                filter
                    .user_id
                    .as_ref()
                    .map(|u| u == &t.user_id)
                    .unwrap_or(true)
                    && filter.is_active.map(|a| a == t.is_active).unwrap_or(true)
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn record_execution(
        &self,
        execution: Execution,
        new_last_known_state: Option<NewLastKnownState>,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let task_id = execution.task_id;
        inner.executions.insert(execution.id, execution);

        if let Some(update) = new_last_known_state {
            if let Some(task) = inner.tasks.get_mut(&task_id) {
                task.last_execution_id = Some(update.execution_id);
                task.last_known_state = Some(update.current_state);
                task.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn list_executions(&self, task_id: Uuid, limit: i64) -> Result<Vec<Execution>, CoreError> {
        let inner = self.inner.lock().unwrap();
        let mut executions: Vec<Execution> = inner
            .executions
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (record.execution_id, record.channel.clone());
        if let Some(existing) = inner.deliveries.get(&key) {
            return match existing.status {
                DeliveryStatus::Delivered => Err(CoreError::AlreadyDelivered),
                // Resume onto the existing pending/failed row, matching
                // `PgTaskStore`'s unique-index short-circuit.
                DeliveryStatus::Pending | DeliveryStatus::Failed => Ok(()),
            };
        }
        inner.deliveries.insert(key, record);
        Ok(())
    }

    async fn finalize_delivery(
        &self,
        execution_id: Uuid,
        channel: &str,
        status: DeliveryStatus,
        provider_message_id: Option<String>,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (execution_id, channel.to_string());
        if let Some(record) = inner.deliveries.get_mut(&key) {
            record.status = status;
            record.delivered_at = Some(Utc::now());
            record.provider_message_id = provider_message_id;
        }
        Ok(())
    }

    async fn count_delivered(&self, task_id: Uuid, channel: &str) -> Result<i64, CoreError> {
        let inner = self.inner.lock().unwrap();
        let count = inner
            .deliveries
            .values()
            .filter(|d| {
                d.channel == channel
                    && d.status == DeliveryStatus::Delivered
                    && inner
                        .executions
                        .get(&d.execution_id)
                        .map(|e| e.task_id == task_id)
                        .unwrap_or(false)
            })
            .count();
        Ok(count as i64)
    }
}
