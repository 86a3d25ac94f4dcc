use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::SearchError;
use crate::config::ServiceConfig;
use crate::pipeline::research::{SearchDocument, SearchParams, SearchProvider};

const SEARCH_TIMEOUT_SECS: u64 = 30;

/// Tavily web search client.
pub struct TavilySearch {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TavilySearch {
    /// A missing key is reported as `NotConfigured` on the first search,
    /// so that the run fails with a configuration error rather than at startup.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| SearchError::RequestFailed(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, SearchError> {
        Self::new(&config.tavily_base_url, config.tavily_api_key.clone())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Request body for Tavily /search
#[derive(Serialize)]
struct TavilySearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    search_depth: &'a str,
}

#[derive(Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl From<TavilyResult> for SearchDocument {
    fn from(r: TavilyResult) -> Self {
        Self {
            url: r.url,
            title: r.title,
            content: r.content,
            published_at: r.published_date,
            score: r.score,
        }
    }
}

/// Map a non-success HTTP status to a search error.
fn classify_status(status: u16, body: String) -> SearchError {
    match status {
        401 | 403 | 429 => SearchError::Blocked { status, body },
        _ => SearchError::RequestFailed(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchDocument>, SearchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SearchError::NotConfigured("TAVILY_API_KEY is not set".into()))?;

        let url = format!("{}/search", self.base_url);
        let body = TavilySearchRequest {
            api_key,
            query,
            max_results: params.max_results,
            search_depth: params.depth.as_str(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), text));
        }

        let parsed: TavilySearchResponse = serde_json::from_str(&text).map_err(|e| {
            let preview: String = text.chars().take(120).collect();
            SearchError::NonJson(format!("{e}: {preview}"))
        })?;

        tracing::debug!(query, results = parsed.results.len(), "Search completed");
        Ok(parsed.results.into_iter().map(SearchDocument::from).collect())
    }
}
