//! Dense, lexical and hybrid retrieval over a [`SearchBackend`].
//!
//! Hybrid retrieval issues the dense and lexical searches concurrently and
//! fuses them with [`reciprocal_rank_fusion`]. Each backend call is bounded by
//! the configured timeout; a failed or timed-out call counts as zero results
//! for that call only.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::{SearchBackend, SearchMode, SearchRequest};
use crate::deadline::bounded;
use crate::document::{Document, descending_score};
use crate::error::{RagError, Result};
use crate::fusion::reciprocal_rank_fusion;
use crate::session::{RetrievalParameters, Strategy};

/// Runs a retrieval strategy against a backend.
#[derive(Clone)]
pub struct Retriever {
    backend: Arc<dyn SearchBackend>,
    call_timeout: Duration,
}

impl Retriever {
    pub fn new(backend: Arc<dyn SearchBackend>, call_timeout: Duration) -> Self {
        Self { backend, call_timeout }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Retrieve up to `params.top_k` documents for `query`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] for invalid parameters or a filter
    /// the backend rejects. Backend outages are not errors.
    pub async fn retrieve(&self, query: &str, params: &RetrievalParameters) -> Result<Vec<Document>> {
        params.validate()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        match params.strategy {
            Strategy::Dense => self.search_one(query, params, SearchMode::Dense).await,
            Strategy::Lexical => self.search_one(query, params, SearchMode::Lexical).await,
            Strategy::Hybrid => {
                let (dense, lexical) = tokio::join!(
                    self.search_one(query, params, SearchMode::Dense),
                    self.search_one(query, params, SearchMode::Lexical),
                );
                let lists = [dense?, lexical?];
                let mut fused = reciprocal_rank_fusion(&lists, params.fusion_smoothing)?;
                fused.truncate(params.top_k);
                debug!(
                    dense = lists[0].len(),
                    lexical = lists[1].len(),
                    fused = fused.len(),
                    smoothing = params.fusion_smoothing,
                    "hybrid retrieval fused"
                );
                Ok(fused)
            }
        }
    }

    async fn search_one(
        &self,
        query: &str,
        params: &RetrievalParameters,
        mode: SearchMode,
    ) -> Result<Vec<Document>> {
        let request = SearchRequest {
            query,
            top_k: params.top_k,
            filter: &params.filter_expression,
            mode,
        };
        let backend = self.backend.name();
        let result = bounded(self.call_timeout, self.backend.search(&request), |after| {
            RagError::RetrievalUnavailable {
                backend: backend.to_string(),
                message: format!("{mode} search timed out after {after:?}"),
            }
        })
        .await;

        match result {
            Ok(mut docs) => {
                for doc in docs.iter_mut().filter(|d| !d.relevance_score.is_finite()) {
                    warn!(
                        backend,
                        %mode,
                        source = %doc.source,
                        score = doc.relevance_score,
                        "non-finite score replaced with 0"
                    );
                    doc.relevance_score = 0.0;
                }
                docs.sort_by(|a, b| descending_score(a.relevance_score, b.relevance_score));
                docs.truncate(params.top_k);
                debug!(backend, %mode, hits = docs.len(), "backend search completed");
                Ok(docs)
            }
            Err(e) if e.is_invalid_parameter() => Err(e),
            Err(e) => {
                warn!(backend, %mode, error = %e, "backend search failed, treating as no results");
                Ok(Vec::new())
            }
        }
    }
}
