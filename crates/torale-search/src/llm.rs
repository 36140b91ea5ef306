//! Typed DSRs signatures for the three `GroundedSearch` operations
//! (spec.md §4.3). Grounded on sage-core's `sage_agent.rs` — same
//! `dspy_rs::Signature` derive + `Predict::<T>::builder()` call pattern,
//! one signature per distinct response contract instead of one generic
//! completion.
//!
//! `current_state` travels as a JSON-encoded string output rather than a
//! native `serde_json::Value` field: the model commits to an opaque shape
//! per task (spec.md §4.3), so the signature only needs to carry text: the
//! port layer parses it.

#[derive(dspy_rs::Signature, Clone, Debug)]
pub struct SearchSignature {
    #[input(desc = "The question to answer using the web search results below")]
    pub query: String,

    #[input(desc = "Web search results and AI summary relevant to the query")]
    pub search_context: String,

    #[output(desc = "A direct answer to the query, grounded only in the search context given")]
    pub answer: String,

    #[output(
        desc = "A compact JSON object capturing the facts from your answer relevant to future comparison (e.g. {\"announced\": true, \"date\": \"2025-09-10\"}). Use stable keys across calls for the same query."
    )]
    pub current_state_json: String,
}

pub const SEARCH_INSTRUCTION: &str = r#"You answer questions using ONLY the provided search context. Do not use outside knowledge or speculate beyond what the search results state. If the search results do not contain an answer, say so plainly in `answer` and emit a current_state_json reflecting that nothing new was found.

current_state_json must be a single valid JSON object (not an array, not a string), with keys you choose but must reuse consistently across calls for the same query, since it is diffed against prior runs."#;

#[derive(dspy_rs::Signature, Clone, Debug)]
pub struct EvaluateConditionSignature {
    #[input(desc = "The answer produced by the search step")]
    pub answer: String,

    #[input(desc = "The natural-language condition to evaluate against the answer")]
    pub condition_description: String,

    #[output(desc = "true if the condition is satisfied by the answer, false otherwise")]
    pub condition_met: bool,

    #[output(desc = "A short explanation of why the condition is or is not met")]
    pub evaluation: String,

    #[output(
        desc = "An updated JSON object state reflecting the answer, in the same shape/keys as prior calls for this task. Empty string if you have no refinement beyond the search step's state."
    )]
    pub current_state_json: String,
}

pub const EVALUATE_CONDITION_INSTRUCTION: &str = r#"You judge whether a natural-language condition is satisfied by a given answer. Be strict: only set condition_met = true when the answer clearly and specifically satisfies the condition, not when it merely relates to the same topic.

current_state_json is optional refinement of the search step's state snapshot; leave it as an empty string unless you have something to add or correct."#;

#[derive(dspy_rs::Signature, Clone, Debug)]
pub struct CompareStatesSignature {
    #[input(desc = "The JSON state snapshot recorded on the previous execution")]
    pub previous_state_json: String,

    #[input(desc = "The JSON state snapshot recorded on this execution")]
    pub current_state_json: String,

    #[input(desc = "The original search query, for context on what a meaningful change looks like")]
    pub search_query: String,

    #[output(desc = "true if the states differ in a way meaningful to the search query")]
    pub changed: bool,

    #[output(desc = "A human-readable summary of what changed; empty string if nothing changed")]
    pub change_summary: String,
}

pub const COMPARE_STATES_INSTRUCTION: &str = r#"You compare two JSON state snapshots from consecutive executions of the same monitoring task and describe what changed, if anything. Ignore incidental differences (key reordering, formatting, cosmetic rewording) and focus on substantive facts relevant to the search query. If nothing of substance changed, set changed = false and change_summary = "" (empty string)."#;

/// Configures the process-global DSRs `LM` + chat adapter (spec.md §6,
/// `llm.model`). Mirrors sage-core's `SageAgent::configure_lm`.
pub async fn configure_lm(api_base: &str, api_key: &str, model: &str) -> anyhow::Result<()> {
    let lm = dspy_rs::LM::builder()
        .base_url(api_base.to_string())
        .api_key(api_key.to_string())
        .model(model.to_string())
        .temperature(0.2)
        .max_tokens(2048)
        .build()
        .await?;

    dspy_rs::configure(lm, dspy_rs::ChatAdapter);
    Ok(())
}
