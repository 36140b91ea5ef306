//! `GroundedSearch` implementation: Brave Search supplies the web-search
//! tool call, DSRs supplies the structured LLM prompting (spec.md §4.3).
//! Grounded on sage-core's `SageAgent::step`/`configure_lm` call pattern,
//! adapted from one open-ended chat agent to three fixed-schema calls.

use async_trait::async_trait;
use dspy_rs::Predict;
use std::sync::Mutex as StdMutex;

use torale_core::domain::GroundingSource;
use torale_core::grounded_search::{
    CompareStatesOutput, EvaluateConditionOutput, GroundedSearch, GroundedSearchConfig,
    GroundedSearchError, SearchOutput,
};

use crate::brave::{BraveClient, BraveError};
use crate::llm::{
    configure_lm, CompareStatesSignature, CompareStatesSignatureInput, EvaluateConditionSignature,
    EvaluateConditionSignatureInput, SearchSignature, SearchSignatureInput,
    COMPARE_STATES_INSTRUCTION, EVALUATE_CONDITION_INSTRUCTION, SEARCH_INSTRUCTION,
};

pub struct BraveGroundedSearch {
    brave: BraveClient,
    default_model: String,
    llm_api_base: String,
    llm_api_key: String,
    /// `configure_lm`'s effect is process-global (DSRs keeps one active
    /// LM); serialize reconfiguration so concurrent tasks with different
    /// `llm.model` overrides don't race each other mid-call.
    configured_model: StdMutex<String>,
}

impl BraveGroundedSearch {
    pub fn new(
        brave_api_key: String,
        default_model: String,
        llm_api_base: String,
        llm_api_key: String,
    ) -> Result<Self, BraveError> {
        Ok(Self {
            brave: BraveClient::new(brave_api_key)?,
            default_model,
            llm_api_base,
            llm_api_key,
            configured_model: StdMutex::new(String::new()),
        })
    }

    fn model_for(&self, config: &GroundedSearchConfig) -> String {
        config
            .get("llm.model")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_model.clone())
    }

    async fn ensure_model(&self, model: &str) -> Result<(), GroundedSearchError> {
        let needs_reconfigure = {
            let current = self.configured_model.lock().unwrap();
            *current != model
        };
        if needs_reconfigure {
            configure_lm(&self.llm_api_base, &self.llm_api_key, model)
                .await
                .map_err(|e| GroundedSearchError::Unavailable(e.to_string()))?;
            *self.configured_model.lock().unwrap() = model.to_string();
        }
        Ok(())
    }

    fn parse_state(raw: &str) -> Result<Option<serde_json::Value>, GroundedSearchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| GroundedSearchError::InvalidResponse(format!("state is not valid JSON: {e}")))
    }
}

/// `dspy_rs::PredictError` only exposes a structured `Parse` variant in
/// the teacher's usage; anything else (transport, rate limit, timeout) is
/// treated as a retryable unavailability, and responses that read as a
/// content-policy refusal are reclassified as fatal.
fn classify_predict_error<E: std::fmt::Display>(e: E) -> GroundedSearchError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("refus") || lower.contains("content polic") || lower.contains("safety") {
        GroundedSearchError::Refusal(message)
    } else if lower.contains("parse") || lower.contains("schema") {
        GroundedSearchError::InvalidResponse(message)
    } else {
        GroundedSearchError::Unavailable(message)
    }
}

#[async_trait]
impl GroundedSearch for BraveGroundedSearch {
    async fn search(
        &self,
        query: &str,
        config: &GroundedSearchConfig,
    ) -> Result<SearchOutput, GroundedSearchError> {
        self.ensure_model(&self.model_for(config)).await?;

        let web = self
            .brave
            .search(query)
            .await
            .map_err(|e| GroundedSearchError::Unavailable(e.to_string()))?;
        let (search_context, citations) = web.format_for_context();

        let predictor = Predict::<SearchSignature>::builder()
            .instruction(SEARCH_INSTRUCTION)
            .build();
        let output = predictor
            .call(SearchSignatureInput {
                query: query.to_string(),
                search_context,
            })
            .await
            .map_err(classify_predict_error)?;

        let current_state = Self::parse_state(&output.current_state_json)?
            .ok_or_else(|| GroundedSearchError::InvalidResponse("current_state_json was empty".into()))?;

        Ok(SearchOutput {
            answer: output.answer,
            grounding_sources: citations
                .into_iter()
                .map(|(title, uri)| GroundingSource { title, uri })
                .collect(),
            current_state,
        })
    }

    async fn evaluate_condition(
        &self,
        answer: &str,
        condition_description: &str,
        config: &GroundedSearchConfig,
    ) -> Result<EvaluateConditionOutput, GroundedSearchError> {
        self.ensure_model(&self.model_for(config)).await?;

        let predictor = Predict::<EvaluateConditionSignature>::builder()
            .instruction(EVALUATE_CONDITION_INSTRUCTION)
            .build();
        let output = predictor
            .call(EvaluateConditionSignatureInput {
                answer: answer.to_string(),
                condition_description: condition_description.to_string(),
            })
            .await
            .map_err(classify_predict_error)?;

        Ok(EvaluateConditionOutput {
            condition_met: output.condition_met,
            evaluation: output.evaluation,
            current_state: Self::parse_state(&output.current_state_json)?,
        })
    }

    async fn compare_states(
        &self,
        previous_state: &serde_json::Value,
        current_state: &serde_json::Value,
        search_query: &str,
        config: &GroundedSearchConfig,
    ) -> Result<CompareStatesOutput, GroundedSearchError> {
        self.ensure_model(&self.model_for(config)).await?;

        let predictor = Predict::<CompareStatesSignature>::builder()
            .instruction(COMPARE_STATES_INSTRUCTION)
            .build();
        let output = predictor
            .call(CompareStatesSignatureInput {
                previous_state_json: previous_state.to_string(),
                current_state_json: current_state.to_string(),
                search_query: search_query.to_string(),
            })
            .await
            .map_err(classify_predict_error)?;

        Ok(CompareStatesOutput {
            changed: output.changed,
            change_summary: output.change_summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_impl() -> BraveGroundedSearch {
        BraveGroundedSearch::new(
            "brave-key".into(),
            "gpt-4o-mini".into(),
            "https://api.openai.com/v1".into(),
            "llm-key".into(),
        )
        .unwrap()
    }

    #[test]
    fn parse_state_accepts_valid_json_object() {
        let value = BraveGroundedSearch::parse_state(r#"{"announced": true}"#)
            .unwrap()
            .unwrap();
        assert_eq!(value["announced"], serde_json::json!(true));
    }

    #[test]
    fn parse_state_treats_empty_string_as_none() {
        assert!(BraveGroundedSearch::parse_state("  ").unwrap().is_none());
    }

    #[test]
    fn parse_state_rejects_malformed_json() {
        let err = BraveGroundedSearch::parse_state("{not json}").unwrap_err();
        assert!(matches!(err, GroundedSearchError::InvalidResponse(_)));
    }

    #[test]
    fn model_for_prefers_task_config_override() {
        let search = search_impl();
        let mut config = GroundedSearchConfig::new();
        config.insert("llm.model".to_string(), serde_json::json!("gpt-4o"));
        assert_eq!(search.model_for(&config), "gpt-4o");
    }

    #[test]
    fn model_for_falls_back_to_default() {
        let search = search_impl();
        assert_eq!(search.model_for(&GroundedSearchConfig::new()), "gpt-4o-mini");
    }

    #[test]
    fn classify_predict_error_detects_refusal_language() {
        let err = classify_predict_error("request blocked by content policy");
        assert!(matches!(err, GroundedSearchError::Refusal(_)));
    }

    #[test]
    fn classify_predict_error_defaults_to_unavailable() {
        let err = classify_predict_error("connection reset by peer");
        assert!(matches!(err, GroundedSearchError::Unavailable(_)));
    }
}
