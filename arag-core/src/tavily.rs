//! Tavily web search collaborator.
//!
//! This module is only available when the `tavily` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RagError, Result};
use crate::web::{WebResult, WebSearch};

/// The Tavily search endpoint.
const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

const DEFAULT_MAX_RESULTS: usize = 5;

const PROVIDER: &str = "Tavily";

/// A [`WebSearch`] backed by the Tavily search API.
///
/// # Example
///
/// ```rust,ignore
/// use arag_core::tavily::TavilyWebSearch;
///
/// let web = TavilyWebSearch::new("tvly-...")?.with_max_results(3);
/// let results = web.search("万达 最新 增值服务").await?;
/// ```
pub struct TavilyWebSearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
}

impl TavilyWebSearch {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::InvalidParameter("Tavily API key must not be empty".into()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: TAVILY_SEARCH_URL.into(),
            max_results: DEFAULT_MAX_RESULTS,
        })
    }

    /// Create a new client using the `TAVILY_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY").map_err(|_| {
            RagError::InvalidParameter("TAVILY_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key)
    }

    /// Set the number of results requested per search.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Override the search endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn unavailable(message: String) -> RagError {
        RagError::WebSearchUnavailable { provider: PROVIDER.into(), message }
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

impl From<SearchHit> for WebResult {
    fn from(hit: SearchHit) -> Self {
        WebResult { url: hit.url, content: hit.content, score: hit.score }
    }
}

#[async_trait]
impl WebSearch for TavilyWebSearch {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn search(&self, query: &str) -> Result<Vec<WebResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, max_results = self.max_results, "web search");

        let request_body =
            SearchRequest { query, max_results: self.max_results, search_depth: "basic" };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                Self::unavailable(format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(provider = PROVIDER, %status, "API error");
            return Err(Self::unavailable(format!("API returned {status}: {body}")));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            Self::unavailable(format!("failed to parse response: {e}"))
        })?;

        Ok(parsed.results.into_iter().map(WebResult::from).collect())
    }
}
