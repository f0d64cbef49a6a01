//! Web search collaborator used when the private corpus is not enough.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Document, UNPAGED, WEB_KEYWORDS, truncate_chars};
use crate::error::Result;

/// One result from a web search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub url: String,
    /// Page content, or a snippet when the provider has no full text.
    pub content: String,
    /// Provider relevance score, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl WebResult {
    /// Convert into a [`Document`] with at most `max_chars` characters of content.
    ///
    /// Web documents are unpaged, tagged with the `web` keyword, and scored
    /// with the provider score or `0.0`.
    pub fn into_document(self, max_chars: usize) -> Document {
        Document {
            content: truncate_chars(&self.content, max_chars, ""),
            source: self.url,
            page_number: UNPAGED,
            keywords: WEB_KEYWORDS.to_string(),
            relevance_score: self.score.unwrap_or(0.0),
        }
    }
}

/// An external search engine.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<WebResult>>;
}
