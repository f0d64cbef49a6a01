//! Search backend trait for dense and lexical retrieval.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::Result;

/// Which index a backend search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Dense,
    Lexical,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Dense => f.write_str("dense"),
            SearchMode::Lexical => f.write_str("lexical"),
        }
    }
}

/// A single backend search call.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub top_k: usize,
    /// Scalar filter over document metadata, in the backend's own syntax.
    pub filter: &'a str,
    pub mode: SearchMode,
}

/// A storage backend supporting dense and lexical search over one corpus.
///
/// Implementations must populate `relevance_score` on every returned
/// [`Document`], with higher meaning more relevant in both modes. Results need
/// not be sorted; the caller orders them.
///
/// Backends are shared across concurrent sessions and must tolerate
/// concurrent calls.
///
/// # Example
///
/// ```rust,ignore
/// use arag_core::{SearchBackend, SearchMode, SearchRequest};
///
/// let hits = backend
///     .search(&SearchRequest { query: "增值服务", top_k: 5, filter: "page_number >= 1", mode: SearchMode::Lexical })
///     .await?;
/// ```
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Run one search.
    ///
    /// Returns [`RagError::InvalidParameter`](crate::RagError::InvalidParameter) for a
    /// malformed filter and
    /// [`RagError::RetrievalUnavailable`](crate::RagError::RetrievalUnavailable) for
    /// anything else that goes wrong.
    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<Document>>;
}
