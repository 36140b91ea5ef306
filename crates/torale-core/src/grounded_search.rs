//! GroundedSearch port (spec.md §4.3). Three separately-typed operations
//! instead of one generic "complete" call, so an implementation can fuse
//! them into one model call or keep them distinct.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::GroundingSource;

#[derive(Debug, Error)]
pub enum GroundedSearchError {
    #[error("grounded search unavailable: {0}")]
    Unavailable(String),
    #[error("grounded search returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("grounded search refused the request: {0}")]
    Refusal(String),
}

impl From<GroundedSearchError> for crate::error::CoreError {
    fn from(e: GroundedSearchError) -> Self {
        match e {
            GroundedSearchError::Unavailable(m) => crate::error::CoreError::LLMUnavailable(m),
            GroundedSearchError::InvalidResponse(m) => {
                crate::error::CoreError::LLMInvalidResponse(m)
            }
            GroundedSearchError::Refusal(m) => crate::error::CoreError::LLMRefusal(m),
        }
    }
}

pub struct SearchOutput {
    pub answer: String,
    pub grounding_sources: Vec<GroundingSource>,
    pub current_state: serde_json::Value,
}

pub struct EvaluateConditionOutput {
    pub condition_met: bool,
    pub evaluation: String,
    pub current_state: Option<serde_json::Value>,
}

pub struct CompareStatesOutput {
    pub changed: bool,
    pub change_summary: String,
}

/// Per-task configuration passed opaquely through to the implementation
/// (spec.md §3, `Task.config`; e.g. `llm.model`).
pub type GroundedSearchConfig = HashMap<String, serde_json::Value>;

#[async_trait]
pub trait GroundedSearch: Send + Sync {
    /// `query` already has the temporal-context prefix prepended by the
    /// executor (spec.md §4.3).
    async fn search(
        &self,
        query: &str,
        config: &GroundedSearchConfig,
    ) -> Result<SearchOutput, GroundedSearchError>;

    async fn evaluate_condition(
        &self,
        answer: &str,
        condition_description: &str,
        config: &GroundedSearchConfig,
    ) -> Result<EvaluateConditionOutput, GroundedSearchError>;

    async fn compare_states(
        &self,
        previous_state: &serde_json::Value,
        current_state: &serde_json::Value,
        search_query: &str,
        config: &GroundedSearchConfig,
    ) -> Result<CompareStatesOutput, GroundedSearchError>;
}
