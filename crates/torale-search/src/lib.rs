//! Brave Search + DSRs implementation of `torale_core::grounded_search::GroundedSearch`.

pub mod brave;
pub mod llm;
pub mod search;

use std::sync::Arc;

use torale_core::grounded_search::GroundedSearch;

pub use search::BraveGroundedSearch;

/// Builds the grounded-search port from process configuration. Returns an
/// error if `BRAVE_API_KEY` is unset — there is no search without it.
pub fn build_grounded_search(config: &torale_core::Config) -> anyhow::Result<Arc<dyn GroundedSearch>> {
    let brave_api_key = config
        .brave_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("BRAVE_API_KEY must be set to build the grounded search port"))?;
    let llm_api_key = config
        .llm_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("LLM_API_KEY must be set to build the grounded search port"))?;

    let search = BraveGroundedSearch::new(
        brave_api_key,
        config.llm_model.clone(),
        config.llm_api_base.clone(),
        llm_api_key,
    )?;

    Ok(Arc::new(search))
}
