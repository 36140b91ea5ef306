//! Executor (spec.md §4.4): reduces a `Task` plus its prior state to a
//! complete `Execution`. Never fails — every error category is encoded into
//! the returned `Execution` instead.

use std::future::Future;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{Execution, ExecutionResult, ExecutionStatus, Task};
use crate::grounded_search::{GroundedSearch, GroundedSearchError};

/// Retries a single `GroundedSearch` call per spec.md §7: `LLMUnavailable`
/// gets up to 3 attempts with exponential backoff, `LLMInvalidResponse`
/// exactly one retry, everything else is fatal immediately.
async fn with_llm_retry<F, Fut, T>(mut call: F) -> Result<T, GroundedSearchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GroundedSearchError>>,
{
    let mut unavailable_attempts = 0u32;
    let mut invalid_response_retries_left = 1u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(GroundedSearchError::Unavailable(m)) => {
                unavailable_attempts += 1;
                if unavailable_attempts >= 3 {
                    return Err(GroundedSearchError::Unavailable(m));
                }
                tokio::time::sleep(StdDuration::from_millis(200 * 2u64.pow(unavailable_attempts))).await;
            }
            Err(GroundedSearchError::InvalidResponse(m)) => {
                if invalid_response_retries_left == 0 {
                    return Err(GroundedSearchError::InvalidResponse(m));
                }
                invalid_response_retries_left -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct Executor<'a> {
    pub clock: &'a dyn Clock,
    pub search: &'a dyn GroundedSearch,
    /// Mirrors `executor.state_hash.canonical_keys` (spec.md §6); disabling
    /// it forces every comparison through `GroundedSearch::compare_states`.
    pub canonical_hash_enabled: bool,
}

impl<'a> Executor<'a> {
    pub fn new(clock: &'a dyn Clock, search: &'a dyn GroundedSearch, canonical_hash_enabled: bool) -> Self {
        Self {
            clock,
            search,
            canonical_hash_enabled,
        }
    }

    /// `previous_execution` is the task's most recently *successful*
    /// execution, if any — it supplies both the temporal-context timestamp
    /// and (via `task.last_known_state`) the state to diff against.
    pub async fn execute(
        &self,
        task: &Task,
        execution_id: Uuid,
        previous_execution_at: Option<DateTime<Utc>>,
    ) -> Execution {
        let started_at = self.clock.now();
        let mut execution = Execution::pending(execution_id, task.id, started_at);
        execution.status = ExecutionStatus::Running;

        let query = self.build_query(task, previous_execution_at);

        let search_output = match with_llm_retry(|| self.search.search(&query, &task.config)).await {
            Ok(output) => output,
            Err(e) => return self.fail(execution, e.into()),
        };

        let eval_output = match with_llm_retry(|| {
            self.search
                .evaluate_condition(&search_output.answer, &task.condition_description, &task.config)
        })
        .await
        {
            Ok(output) => output,
            Err(e) => return self.fail(execution, e.into()),
        };

        // Evaluation step wins when both return a state (spec.md §4.4 tie-break).
        let current_state = eval_output
            .current_state
            .clone()
            .unwrap_or_else(|| search_output.current_state.clone());

        let change_summary = match &task.last_known_state {
            None => None,
            Some(previous_state) => {
                if self.canonical_hash_enabled && canonical_hash(previous_state) == canonical_hash(&current_state) {
                    Some(String::new())
                } else {
                    match with_llm_retry(|| {
                        self.search
                            .compare_states(previous_state, &current_state, &task.search_query, &task.config)
                    })
                    .await
                    {
                        Ok(output) if output.changed => Some(output.change_summary),
                        Ok(_) => Some(String::new()),
                        Err(e) => return self.fail(execution, e.into()),
                    }
                }
            }
        };

        execution.status = ExecutionStatus::Success;
        execution.completed_at = Some(self.clock.now());
        execution.condition_met = Some(eval_output.condition_met);
        execution.change_summary = change_summary;
        execution.grounding_sources = search_output.grounding_sources;
        execution.result = Some(ExecutionResult {
            answer: search_output.answer,
            evaluation: eval_output.evaluation,
            current_state,
        });
        execution
    }

    fn build_query(&self, task: &Task, previous_execution_at: Option<DateTime<Utc>>) -> String {
        let now = self.clock.now();
        let temporal_context = match previous_execution_at {
            None => "First execution.".to_string(),
            Some(previous) => {
                let ago = now - previous;
                format!(
                    "Current time is {}. Last execution was {} ago.",
                    now.to_rfc3339(),
                    humanize_duration(ago)
                )
            }
        };
        format!("{temporal_context} {}", task.search_query)
    }

    fn fail(&self, mut execution: Execution, error: crate::error::CoreError) -> Execution {
        execution.status = ExecutionStatus::Failed;
        execution.completed_at = Some(self.clock.now());
        execution.error_message = Some(error.to_string());
        execution
    }
}

fn humanize_duration(d: chrono::Duration) -> String {
    let seconds = d.num_seconds().max(0);
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h", seconds / 3600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

/// Canonical-form hash used as the §4.4 fast path: recursively sort object
/// keys, then hash the resulting serialization. Two JSON values representing
/// the same facts up to key ordering hash equal.
pub fn canonical_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", entries.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FakeClock;
    use crate::domain::{GroundingSource, NotifyBehavior};
    use crate::grounded_search::{
        CompareStatesOutput, EvaluateConditionOutput, GroundedSearchConfig, GroundedSearchError, SearchOutput,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn canonical_hash_distinguishes_values() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }

    struct ScriptedSearch {
        compare_calls: Mutex<u32>,
    }

    #[async_trait]
    impl GroundedSearch for ScriptedSearch {
        async fn search(
            &self,
            _query: &str,
            _config: &GroundedSearchConfig,
        ) -> Result<SearchOutput, GroundedSearchError> {
            Ok(SearchOutput {
                answer: "Still no date.".into(),
                grounding_sources: vec![GroundingSource {
                    title: "Example".into(),
                    uri: "https://example.com".into(),
                }],
                current_state: serde_json::json!({"announced": false}),
            })
        }

        async fn evaluate_condition(
            &self,
            _answer: &str,
            _condition_description: &str,
            _config: &GroundedSearchConfig,
        ) -> Result<EvaluateConditionOutput, GroundedSearchError> {
            Ok(EvaluateConditionOutput {
                condition_met: false,
                evaluation: "Not yet.".into(),
                current_state: None,
            })
        }

        async fn compare_states(
            &self,
            _previous_state: &Value,
            _current_state: &Value,
            _search_query: &str,
            _config: &GroundedSearchConfig,
        ) -> Result<CompareStatesOutput, GroundedSearchError> {
            *self.compare_calls.lock().unwrap() += 1;
            Ok(CompareStatesOutput {
                changed: true,
                change_summary: "Changed.".into(),
            })
        }
    }

    fn sample_task(last_known_state: Option<Value>) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "T1".into(),
            schedule: "*/1 * * * *".into(),
            search_query: "Has Apple announced iPhone 17 release date?".into(),
            condition_description: "A specific release date is announced".into(),
            notify_behavior: NotifyBehavior::Once,
            config: HashMap::new(),
            is_active: true,
            last_execution_id: last_known_state.as_ref().map(|_| Uuid::new_v4()),
            last_known_state,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn first_observation_skips_compare_states() {
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
        let search = ScriptedSearch {
            compare_calls: Mutex::new(0),
        };
        let executor = Executor::new(&clock, &search, true);
        let task = sample_task(None);

        let execution = executor.execute(&task, Uuid::new_v4(), None).await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.change_summary, None);
        assert_eq!(*search.compare_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn matching_canonical_hash_skips_llm_compare() {
        let clock = FakeClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap());
        let search = ScriptedSearch {
            compare_calls: Mutex::new(0),
        };
        let executor = Executor::new(&clock, &search, true);
        let task = sample_task(Some(serde_json::json!({"announced": false})));

        let execution = executor
            .execute(&task, Uuid::new_v4(), Some(clock.now()))
            .await;

        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.change_summary, Some(String::new()));
        assert_eq!(*search.compare_calls.lock().unwrap(), 0);
    }
}
