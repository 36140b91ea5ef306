//! TaskService (spec.md §4.8): the façade consumed by HTTP/CLI callers.
//! Every mutation touches the store and the runtime in the order the spec
//! demands to preserve invariant (1) (`is_active` false iff paused).

use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::domain::{Execution, NewTask, Task, TaskFilter, TaskPatch};
use crate::error::{CoreError, CoreResult};
use crate::store::TaskStore;
use crate::workflow_runtime::WorkflowRuntime;

#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub user_id: String,
    pub name: String,
    pub schedule: String,
    pub search_query: String,
    pub condition_description: String,
    pub notify_behavior: String,
    pub config: std::collections::HashMap<String, serde_json::Value>,
}

/// Divergence between the `tasks.is_active` source of truth and the
/// runtime's own `schedules` side-table (SPEC_FULL.md, supplementing
/// spec.md §7's admin-driven reconciliation with a read-only primitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDivergence {
    InSync,
    ShouldPause,
    ShouldResume,
}

pub struct TaskService {
    pub store: Arc<dyn TaskStore>,
    pub runtime: Arc<dyn WorkflowRuntime>,
    pub clock: Arc<dyn Clock>,
    pub schedule_min_interval: chrono::Duration,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>, runtime: Arc<dyn WorkflowRuntime>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            store,
            runtime,
            clock,
            schedule_min_interval: config.schedule_min_interval,
        }
    }

    fn validate_schedule(&self, expr: &str) -> CoreResult<()> {
        crate::clock::validate_min_interval(expr, self.clock.now(), self.schedule_min_interval)
    }

    pub async fn create_task(&self, request: CreateTaskRequest) -> CoreResult<Task> {
        self.validate_schedule(&request.schedule)?;
        let notify_behavior = request.notify_behavior.parse()?;

        let task = self
            .store
            .create_task(NewTask {
                user_id: request.user_id,
                name: request.name,
                schedule: request.schedule,
                search_query: request.search_query,
                condition_description: request.condition_description,
                notify_behavior,
                config: request.config,
            })
            .await?;

        if let Err(e) = self.runtime.register_schedule(task.id, &task.schedule).await {
            // Compensating action: the schedule never fired, so the task
            // must not be left visible as active (spec.md §4.8 Create).
            let _ = self.store.delete_task(task.id).await;
            return Err(e);
        }

        Ok(task)
    }

    pub async fn get_task(&self, id: Uuid, user_id: &str) -> CoreResult<Task> {
        let task = self.store.get_task(id).await?;
        if task.user_id != user_id {
            return Err(CoreError::NotFound(format!("task {id}")));
        }
        Ok(task)
    }

    pub async fn update_task(&self, id: Uuid, patch: TaskPatch) -> CoreResult<Task> {
        if let Some(schedule) = &patch.schedule {
            self.validate_schedule(schedule)?;
        }

        let before = self.store.get_task(id).await?;
        let after = self.store.update_task(id, patch).await?;

        if after.schedule != before.schedule {
            // `register_schedule` always (re-)activates the runtime's own
            // row, so an inactive task whose schedule changes must be
            // paused again immediately rather than left wrongly un-paused.
            self.runtime.register_schedule(after.id, &after.schedule).await?;
            if !after.is_active {
                self.runtime.pause(after.id).await?;
            }
        }
        if after.is_active != before.is_active {
            if after.is_active {
                self.runtime.resume(after.id).await?;
            } else {
                self.runtime.pause(after.id).await?;
            }
        }

        Ok(after)
    }

    pub async fn delete_task(&self, id: Uuid, user_id: &str) -> CoreResult<()> {
        let task = self.get_task(id, user_id).await?;
        self.runtime.unregister(task.id).await?;
        self.store.delete_task(task.id).await
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> CoreResult<Vec<Task>> {
        self.store.list_tasks(filter).await
    }

    pub async fn run_task(&self, id: Uuid, suppress_notifications: bool) -> CoreResult<Uuid> {
        self.store.get_task(id).await?;
        self.runtime.run_now(id, suppress_notifications).await
    }

    pub async fn list_executions(&self, task_id: Uuid, limit: i64) -> CoreResult<Vec<Execution>> {
        self.store.list_executions(task_id, limit).await
    }

    /// Read-only comparison of `tasks.is_active` against the runtime's
    /// `schedules.paused` view, for an admin-driven reconciliation sweep
    /// (spec.md §7 "Reconciliation (admin-driven)").
    pub async fn reconcile_schedule_state(&self, task_id: Uuid) -> CoreResult<ScheduleDivergence> {
        let task = self.store.get_task(task_id).await?;
        let runtime_paused = self.runtime.is_paused(task_id).await?;

        Ok(match runtime_paused {
            None => ScheduleDivergence::InSync,
            Some(paused) if paused == !task.is_active => ScheduleDivergence::InSync,
            Some(true) => ScheduleDivergence::ShouldResume,
            Some(false) => ScheduleDivergence::ShouldPause,
        })
    }
}
