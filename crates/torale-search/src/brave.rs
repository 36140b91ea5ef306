//! Brave Search API client, trimmed to the web-search endpoint the grounded
//! search port needs for citations. Grounded on sage-tools's `BraveClient`
//! (AI-summarizer + web results), minus the Pro-only rich-data callbacks
//! this port has no use for.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const BRAVE_API_BASE: &str = "https://api.search.brave.com/res/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum BraveError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
}

#[derive(Clone)]
pub struct BraveClient {
    client: reqwest::Client,
    api_key: Arc<String>,
}

impl BraveClient {
    pub fn new(api_key: String) -> Result<Self, BraveError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Torale/0.1.0")
            .build()?;

        Ok(Self {
            client,
            api_key: Arc::new(api_key),
        })
    }

    pub async fn search(&self, query: &str) -> Result<SearchResponse, BraveError> {
        let url = format!("{BRAVE_API_BASE}/web/search");

        let params = [
            ("q", query.to_string()),
            ("summary", "1".to_string()),
            ("extra_snippets", "true".to_string()),
        ];

        let response = self
            .client
            .get(&url)
            .header("X-Subscription-Token", self.api_key.as_str())
            .header("Accept", "application/json")
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BraveError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut search_response: SearchResponse = response.json().await?;

        if let Some(ref summarizer) = search_response.summarizer {
            debug!("fetching Brave AI summary");
            match self.fetch_summary(&summarizer.key).await {
                Ok(summary) => search_response.summary_text = summary.extract_text(),
                Err(e) => warn!("failed to fetch Brave summary: {e}"),
            }
        }

        Ok(search_response)
    }

    async fn fetch_summary(&self, key: &str) -> Result<SummarizerResponse, BraveError> {
        let url = format!("{BRAVE_API_BASE}/summarizer/search");

        let response = self
            .client
            .get(&url)
            .header("X-Subscription-Token", self.api_key.as_str())
            .header("Accept", "application/json")
            .query(&[("key", key)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BraveError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

impl std::fmt::Debug for BraveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BraveClient")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    pub query: Option<QueryInfo>,
    pub web: Option<WebResults>,
    pub summarizer: Option<Summarizer>,
    #[serde(skip)]
    pub summary_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryInfo {
    pub original: Option<String>,
    pub altered: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebResults {
    pub results: Option<Vec<SearchResult>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub age: Option<String>,
    pub extra_snippets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Summarizer {
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerResponse {
    pub status: Option<String>,
    pub summary: Option<Vec<SummaryItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub data: Option<serde_json::Value>,
}

impl SummarizerResponse {
    pub fn extract_text(&self) -> Option<String> {
        let items = self.summary.as_ref()?;
        let mut text = String::new();
        for item in items {
            if item.item_type == "token" {
                if let Some(s) = item.data.as_ref().and_then(|d| d.as_str()) {
                    text.push_str(s);
                }
            }
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl SearchResponse {
    /// Render the web results + summary into prose text the LLM is given
    /// as search context, plus a title/uri citation list (spec.md §4.3).
    pub fn format_for_context(&self) -> (String, Vec<(String, String)>) {
        let mut output = String::new();
        let mut sources = Vec::new();

        if let Some(query) = &self.query {
            if let (Some(original), Some(altered)) = (&query.original, &query.altered) {
                if original != altered {
                    output.push_str(&format!("Showing results for: {altered}\n\n"));
                }
            }
        }

        if let Some(summary) = &self.summary_text {
            output.push_str("AI Summary:\n");
            output.push_str(summary);
            output.push_str("\n\n");
        }

        if let Some(web) = &self.web {
            if let Some(results) = &web.results {
                output.push_str("Search results:\n\n");
                for (i, result) in results.iter().take(8).enumerate() {
                    let age = result
                        .age
                        .as_deref()
                        .map(|a| format!(" ({a})"))
                        .unwrap_or_default();
                    output.push_str(&format!(
                        "{}. {}{}\n   {}\n",
                        i + 1,
                        result.title,
                        age,
                        result.description.as_deref().unwrap_or("")
                    ));
                    if let Some(extras) = &result.extra_snippets {
                        for snippet in extras.iter().take(2) {
                            output.push_str(&format!("   > {snippet}\n"));
                        }
                    }
                    sources.push((result.title.clone(), result.url.clone()));
                }
            }
        }

        if output.is_empty() {
            output.push_str("No results found.");
        }

        (output, sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_for_context_collects_web_result_citations() {
        let response = SearchResponse {
            query: None,
            web: Some(WebResults {
                results: Some(vec![SearchResult {
                    title: "Apple Newsroom".into(),
                    url: "https://apple.com/newsroom".into(),
                    description: Some("iPhone 17 announced".into()),
                    age: None,
                    extra_snippets: None,
                }]),
            }),
            summarizer: None,
            summary_text: None,
        };

        let (text, sources) = response.format_for_context();
        assert!(text.contains("Apple Newsroom"));
        assert_eq!(sources, vec![("Apple Newsroom".to_string(), "https://apple.com/newsroom".to_string())]);
    }

    #[test]
    fn format_for_context_reports_no_results() {
        let response = SearchResponse {
            query: None,
            web: None,
            summarizer: None,
            summary_text: None,
        };
        let (text, sources) = response.format_for_context();
        assert_eq!(text, "No results found.");
        assert!(sources.is_empty());
    }

    #[test]
    fn summarizer_extract_text_concatenates_tokens() {
        let response = SummarizerResponse {
            status: Some("complete".into()),
            summary: Some(vec![
                SummaryItem { item_type: "token".into(), data: Some(serde_json::json!("Hello, ")) },
                SummaryItem { item_type: "token".into(), data: Some(serde_json::json!("world.")) },
            ]),
        };
        assert_eq!(response.extract_text(), Some("Hello, world.".to_string()));
    }
}
