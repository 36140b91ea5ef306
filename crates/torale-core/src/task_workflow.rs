//! TaskWorkflow (spec.md §4.5): sequences one execution of a task through
//! its activities, each independently retried per the policy in §7.
//!
//! States of a run: `loading -> executing -> persisting -> notifying ->
//! done`. A run may short-circuit to `done` from `executing` on a fatal
//! error, after `PersistResult` writes the failed execution.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ActivityTimeouts;
use crate::domain::{DeliveryRecord, DeliveryStatus, Execution, ExecutionStatus, TaskPatch};
use crate::error::{CoreError, CoreResult};
use crate::executor::Executor;
use crate::grounded_search::GroundedSearch;
use crate::notifier::{NotificationPayload, Notifier};
use crate::notify_behavior::apply_notify_behavior;
use crate::store::TaskStore;
use crate::workflow_runtime::{WorkflowRunner, WorkflowRuntime};
use async_trait::async_trait;

pub struct TaskWorkflow {
    pub store: Arc<dyn TaskStore>,
    pub search: Arc<dyn GroundedSearch>,
    pub notifier: Arc<dyn Notifier>,
    pub runtime: Arc<dyn WorkflowRuntime>,
    pub clock: Arc<dyn Clock>,
    pub canonical_hash_enabled: bool,
    pub timeouts: ActivityTimeouts,
    /// `notifier.default_channel` (spec.md §6) — the channel every
    /// `Deliver` activity stamps on its `DeliveryRecord`.
    pub notifier_default_channel: String,
}

impl TaskWorkflow {
    /// Runs one full execution of `task_id`. `suppress_notifications`
    /// (manual runs only, spec.md §4.5) still computes and logs the
    /// `NotifyDecision` but skips the `Deliver` activity.
    pub async fn run(&self, task_id: Uuid, suppress_notifications: bool) -> CoreResult<Uuid> {
        // LoadTask: retry on StorageUnavailable, capped at 5 attempts (§7).
        let task = with_timeout_result(
            self.timeouts.load,
            retry_on_storage_unavailable(5, || self.store.get_task(task_id)),
        )
        .await?;

        let execution_id = Uuid::new_v4();
        let pending = Execution::pending(execution_id, task_id, self.clock.now());
        with_timeout_result(
            self.timeouts.persist,
            retry_on_storage_unavailable(5, || self.store.record_execution(pending.clone(), None)),
        )
        .await?;

        let previous_execution_at = if task.last_execution_id.is_some() {
            Some(task.updated_at)
        } else {
            None
        };

        let executor = Executor::new(
            self.clock.as_ref(),
            self.search.as_ref(),
            self.canonical_hash_enabled,
        );

        let execution = match with_timeout(
            self.timeouts.execute,
            executor.execute(&task, execution_id, previous_execution_at),
        )
        .await
        {
            Ok(execution) => execution,
            Err(_timeout) => {
                let mut execution = Execution::pending(execution_id, task_id, self.clock.now());
                execution.status = ExecutionStatus::Failed;
                execution.completed_at = Some(self.clock.now());
                execution.error_message = Some("timeout".to_string());
                execution
            }
        };

        let new_last_known_state = match (&execution.status, &execution.result) {
            (ExecutionStatus::Success, Some(result)) => Some(crate::store::NewLastKnownState {
                execution_id,
                current_state: result.current_state.clone(),
            }),
            _ => None,
        };

        with_timeout_result(
            self.timeouts.persist,
            retry_on_storage_unavailable(5, || {
                self.store.record_execution(execution.clone(), new_last_known_state.clone())
            }),
        )
        .await?;

        let decision = apply_notify_behavior(&task, &execution);
        tracing::info!(
            task_id = %task_id,
            execution_id = %execution_id,
            should_deliver = decision.should_deliver,
            should_pause = decision.should_pause,
            "notify decision computed"
        );

        if decision.should_deliver && !suppress_notifications {
            if let Err(e) = self.deliver(&task, execution_id, &execution).await {
                tracing::error!(task_id = %task_id, execution_id = %execution_id, "delivery failed: {e}");
            }
        }

        if decision.should_pause {
            self.runtime.pause(task_id).await?;
            with_timeout_result(
                self.timeouts.persist,
                retry_on_storage_unavailable(5, || {
                    self.store.update_task(
                        task_id,
                        TaskPatch {
                            is_active: Some(false),
                            ..Default::default()
                        },
                    )
                }),
            )
            .await?;
        }

        Ok(execution_id)
    }

    async fn deliver(
        &self,
        task: &crate::domain::Task,
        execution_id: Uuid,
        execution: &Execution,
    ) -> CoreResult<()> {
        let channel = self.notifier_default_channel.clone();
        let record = DeliveryRecord {
            id: Uuid::new_v4(),
            execution_id,
            channel: channel.clone(),
            status: DeliveryStatus::Pending,
            delivered_at: None,
            provider_message_id: None,
            created_at: self.clock.now(),
        };

        match self.store.record_delivery(record).await {
            Ok(()) => {}
            Err(CoreError::AlreadyDelivered) => return Ok(()),
            Err(e) => return Err(e),
        }

        let payload = NotificationPayload {
            task_id: task.id,
            task_name: task.name.clone(),
            user_id: task.user_id.clone(),
            search_query: task.search_query.clone(),
            condition_description: task.condition_description.clone(),
            condition_met: execution.condition_met.unwrap_or(false),
            answer: execution
                .result
                .as_ref()
                .map(|r| r.answer.clone())
                .unwrap_or_default(),
            change_summary: execution.change_summary.clone().filter(|s| !s.is_empty()),
            grounding_sources: execution.grounding_sources.clone(),
            executed_at: execution.completed_at.unwrap_or(execution.started_at),
        };

        let result = with_timeout_result(self.timeouts.deliver, retry_notifier_unavailable(3, || {
            self.store_deliver(execution_id, &payload)
        }))
        .await;

        match result {
            Ok(delivery_result) => {
                self.store
                    .finalize_delivery(
                        execution_id,
                        &channel,
                        DeliveryStatus::Delivered,
                        delivery_result.provider_message_id,
                    )
                    .await
            }
            Err(e) => {
                self.store
                    .finalize_delivery(execution_id, &channel, DeliveryStatus::Failed, None)
                    .await?;
                Err(e)
            }
        }
    }

    async fn store_deliver(
        &self,
        execution_id: Uuid,
        payload: &NotificationPayload,
    ) -> CoreResult<crate::notifier::DeliveryResult> {
        self.notifier
            .deliver(execution_id, payload)
            .await
            .map_err(|e| match e {
                crate::notifier::NotifierError::Unavailable(m) => CoreError::NotifierUnavailable(m),
                crate::notifier::NotifierError::Rejected(m) => CoreError::NotifierRejected(m),
            })
    }
}

#[async_trait]
impl WorkflowRunner for TaskWorkflow {
    async fn run(&self, task_id: Uuid, suppress_notifications: bool) -> CoreResult<Uuid> {
        TaskWorkflow::run(self, task_id, suppress_notifications).await
    }
}

fn backoff_delay(attempt: u32) -> StdDuration {
    StdDuration::from_millis(200 * 2u64.pow(attempt.min(6)))
}

async fn with_timeout<F, T>(timeout: StdDuration, fut: F) -> CoreResult<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| CoreError::Timeout("activity timed out".to_string()))
}

/// Like `with_timeout`, but for activities that already return a
/// `CoreResult` themselves — flattens instead of nesting the timeout error
/// inside an extra `Ok(..)`.
async fn with_timeout_result<F, T>(timeout: StdDuration, fut: F) -> CoreResult<T>
where
    F: std::future::Future<Output = CoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Timeout("activity timed out".to_string())),
    }
}

async fn retry_on_storage_unavailable<F, Fut, T>(max_attempts: u32, mut f: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(CoreError::StorageUnavailable(m)) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(CoreError::StorageUnavailable(m));
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn retry_notifier_unavailable<F, Fut, T>(max_attempts: u32, mut f: F) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = CoreResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(CoreError::NotifierUnavailable(m)) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(CoreError::NotifierUnavailable(m));
                }
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
