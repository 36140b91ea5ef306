//! Core domain model — see spec.md §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Three-valued notification policy (spec.md §4.5 / GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyBehavior {
    Once,
    Always,
    TrackState,
}

impl NotifyBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyBehavior::Once => "once",
            NotifyBehavior::Always => "always",
            NotifyBehavior::TrackState => "track_state",
        }
    }
}

impl FromStr for NotifyBehavior {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(NotifyBehavior::Once),
            "always" => Ok(NotifyBehavior::Always),
            "track_state" => Ok(NotifyBehavior::TrackState),
            other => Err(CoreError::InvalidNotifyBehavior(format!(
                "'{other}' must be one of: once, always, track_state"
            ))),
        }
    }
}

/// A user-declared monitoring intent (spec.md §3, Task entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub schedule: String,
    pub search_query: String,
    pub condition_description: String,
    pub notify_behavior: NotifyBehavior,
    pub config: HashMap<String, serde_json::Value>,
    pub is_active: bool,
    pub last_execution_id: Option<Uuid>,
    pub last_known_state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a caller may set on create; the store assigns the id and
/// timestamps (spec.md §4.2, `CreateTask`).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: String,
    pub name: String,
    pub schedule: String,
    pub search_query: String,
    pub condition_description: String,
    pub notify_behavior: NotifyBehavior,
    pub config: HashMap<String, serde_json::Value>,
}

/// Partial update applied atomically by `TaskStore::update_task` (spec.md §4.2).
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub search_query: Option<String>,
    pub condition_description: Option<String>,
    pub notify_behavior: Option<NotifyBehavior>,
    pub config: Option<HashMap<String, serde_json::Value>>,
    pub is_active: Option<bool>,
}

/// Filter accepted by `TaskStore::list_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub user_id: Option<String>,
    pub is_active: Option<bool>,
}

/// Monotonic lifecycle states of one execution (spec.md §3 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(CoreError::StorageUnavailable(format!(
                "corrupt execution status: '{other}'"
            ))),
        }
    }
}

/// A `{title, uri}` grounding citation, passed through verbatim (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// The payload of a successful grounded-search call (spec.md §4.3/§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub answer: String,
    pub evaluation: String,
    pub current_state: serde_json::Value,
}

/// One completed run of a task (spec.md §3, Execution entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<ExecutionResult>,
    pub condition_met: Option<bool>,
    pub change_summary: Option<String>,
    pub grounding_sources: Vec<GroundingSource>,
    pub error_message: Option<String>,
}

impl Execution {
    pub fn pending(id: Uuid, task_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            task_id,
            status: ExecutionStatus::Pending,
            started_at,
            completed_at: None,
            result: None,
            condition_met: None,
            change_summary: None,
            grounding_sources: Vec::new(),
            error_message: None,
        }
    }

    pub fn is_first_observation(task: &Task) -> bool {
        task.last_execution_id.is_none()
    }
}

/// Delivery attempt status, tracked for idempotency (spec.md §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(CoreError::StorageUnavailable(format!(
                "corrupt delivery status: '{other}'"
            ))),
        }
    }
}

/// One notification attempt keyed by `(execution_id, channel)` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub channel: String,
    pub status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
