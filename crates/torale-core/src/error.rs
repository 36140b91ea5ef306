//! Error taxonomy for the execution engine.
//!
//! Each port (TaskStore, GroundedSearch, Notifier) owns the error kinds that
//! originate from it; `CoreError` is the union the workflow and service
//! layers actually match on. See spec.md §7 for the propagation policy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid notify behavior: {0}")]
    InvalidNotifyBehavior(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("delivery already recorded")]
    AlreadyDelivered,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("grounded search unavailable: {0}")]
    LLMUnavailable(String),

    #[error("grounded search returned an invalid response: {0}")]
    LLMInvalidResponse(String),

    #[error("grounded search refused the request: {0}")]
    LLMRefusal(String),

    #[error("notifier unavailable: {0}")]
    NotifierUnavailable(String),

    #[error("notifier rejected the delivery: {0}")]
    NotifierRejected(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("activity timed out: {0}")]
    Timeout(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl CoreError {
    /// Whether an activity should retry locally after this error (§7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::StorageUnavailable(_)
                | CoreError::LLMUnavailable(_)
                | CoreError::NotifierUnavailable(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
