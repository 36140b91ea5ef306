//! TaskStore port (spec.md §4.2) — a transactional persistence boundary.

mod memory;
mod postgres;

pub use memory::InMemoryTaskStore;
pub use postgres::PgTaskStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{DeliveryRecord, Execution, NewTask, Task, TaskFilter, TaskPatch};
use crate::error::CoreError;

/// Optional atomic side-effect of `record_execution`: update the task's
/// denormalized view of its own latest state in the same transaction
/// (spec.md §3 invariant 3, §4.2).
#[derive(Debug, Clone)]
pub struct NewLastKnownState {
    pub execution_id: Uuid,
    pub current_state: serde_json::Value,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<Task, CoreError>;
    async fn get_task(&self, id: Uuid) -> Result<Task, CoreError>;
    async fn update_task(&self, id: Uuid, patch: TaskPatch) -> Result<Task, CoreError>;
    async fn delete_task(&self, id: Uuid) -> Result<(), CoreError>;
    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>, CoreError>;

    /// Insert `execution`; if `new_last_known_state` is provided, atomically
    /// update the owning task's `last_execution_id` and `last_known_state`
    /// (spec.md §4.2 `RecordExecution`).
    async fn record_execution(
        &self,
        execution: Execution,
        new_last_known_state: Option<NewLastKnownState>,
    ) -> Result<(), CoreError>;

    async fn list_executions(&self, task_id: Uuid, limit: i64) -> Result<Vec<Execution>, CoreError>;

    /// Insert a `pending` delivery record keyed on `(execution_id, channel)`.
    /// Returns `CoreError::AlreadyDelivered` if a `delivered` record already
    /// exists for that key (spec.md §4.2, §4.6).
    async fn record_delivery(&self, record: DeliveryRecord) -> Result<(), CoreError>;

    /// Transition an existing delivery record to its terminal status.
    async fn finalize_delivery(
        &self,
        execution_id: Uuid,
        channel: &str,
        status: crate::domain::DeliveryStatus,
        provider_message_id: Option<String>,
    ) -> Result<(), CoreError>;

    async fn count_delivered(&self, task_id: Uuid, channel: &str) -> Result<i64, CoreError>;
}
