//! Query refinement through the generation collaborator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::deadline::bounded;
use crate::error::{RagError, Result};
use crate::llm::Generator;

fn expansion_prompt(query: &str) -> String {
    format!(
        "Rewrite a short query into a retrieval-friendly form. \
         Keep domain keywords and add 3~5 relevant terms. \
         Original: {query}\n\
         Return only the query; do not add explanations."
    )
}

fn retry_prompt(query: &str) -> String {
    format!(
        "The query below did not retrieve enough relevant passages. \
         Rewrite it so a search engine finds better evidence: keep its intent and domain \
         keywords, make implicit entities explicit, and drop filler words.\n\
         Original: {query}\n\
         Return only the query; do not add explanations."
    )
}

/// Rewrites weak queries before retrieval.
///
/// Only queries shorter than `min_chars` characters (after trimming) are sent
/// to the generator. With `rewrite_on_retry`, every query is rewritten on
/// rounds after the first. A failed or empty rewrite keeps the query as is.
#[derive(Clone)]
pub struct QueryRefiner {
    generator: Arc<dyn Generator>,
    min_chars: usize,
    rewrite_on_retry: bool,
    call_timeout: Duration,
}

impl QueryRefiner {
    pub fn new(generator: Arc<dyn Generator>, min_chars: usize, call_timeout: Duration) -> Self {
        Self { generator, min_chars, rewrite_on_retry: false, call_timeout }
    }

    pub fn with_rewrite_on_retry(mut self, enabled: bool) -> Self {
        self.rewrite_on_retry = enabled;
        self
    }

    /// Refine a first-round query.
    pub async fn refine(&self, query: &str) -> String {
        self.refine_round(query, 0).await
    }

    /// Refine `query` for the round numbered `round` (zero-based).
    pub async fn refine_round(&self, query: &str, round: u32) -> String {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return query.to_string();
        }

        let prompt = if trimmed.chars().count() < self.min_chars {
            expansion_prompt(trimmed)
        } else if self.rewrite_on_retry && round > 0 {
            retry_prompt(trimmed)
        } else {
            return query.to_string();
        };

        match self.rewrite(&prompt).await {
            Ok(refined) if !refined.is_empty() => {
                debug!(original = trimmed, refined = %refined, round, "query rewritten");
                refined
            }
            Ok(_) => {
                debug!(original = trimmed, round, "empty rewrite, keeping query");
                query.to_string()
            }
            Err(e) => {
                warn!(error = %e, round, "query rewrite failed, keeping query");
                query.to_string()
            }
        }
    }

    async fn rewrite(&self, prompt: &str) -> Result<String> {
        let text = bounded(self.call_timeout, self.generator.complete(prompt), |after| {
            RagError::generation(format!("query rewrite timed out after {after:?}"))
        })
        .await?;
        Ok(text.trim().to_string())
    }
}
