//! Grounded answer generation.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::deadline::bounded;
use crate::document::{Citation, Document};
use crate::error::RagError;
use crate::llm::Generator;

/// Separator between documents in rendered context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Render evidence as a prompt context.
///
/// Each document becomes a header line with its page, score, keywords and
/// source, followed by its content.
pub fn render_context(evidence: &[Document]) -> String {
    evidence
        .iter()
        .map(|d| {
            format!(
                "[p{} | score={} | kw={} | src={}]\n{}",
                d.page_number, d.relevance_score, d.keywords, d.source, d.content
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// The result of one generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
    /// True when `text` is the fixed insufficient-context reply.
    pub insufficient_context: bool,
}

/// Answers questions strictly from an evidence set.
#[derive(Clone)]
pub struct AnswerGenerator {
    generator: Arc<dyn Generator>,
    snippet_chars: usize,
    insufficient_answer: String,
    call_timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(
        generator: Arc<dyn Generator>,
        snippet_chars: usize,
        insufficient_answer: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self { generator, snippet_chars, insufficient_answer: insufficient_answer.into(), call_timeout }
    }

    /// Answer `question` from `evidence`.
    ///
    /// With no evidence the generator is not called at all and the fixed
    /// insufficient-context reply is returned with no citations. The same reply
    /// is used when the generator fails, times out or returns nothing.
    pub async fn generate(&self, question: &str, evidence: &[Document]) -> GeneratedAnswer {
        if evidence.is_empty() {
            debug!("no evidence, skipping generation");
            return self.insufficient();
        }

        let prompt = format!(
            "You are a helpful assistant. Answer the question ONLY using the given context.\n\
             If the context is insufficient, say you don't know.\n\n\
             Question:\n{question}\n\n\
             Context:\n{context}\n\n\
             Answer in the language of the question:",
            context = render_context(evidence),
        );

        let result = bounded(self.call_timeout, self.generator.complete(&prompt), |after| {
            RagError::generation(format!("answer generation timed out after {after:?}"))
        })
        .await;

        match result {
            Ok(text) if !text.trim().is_empty() => GeneratedAnswer {
                text: text.trim().to_string(),
                citations: evidence
                    .iter()
                    .map(|d| Citation::from_document(d, self.snippet_chars))
                    .collect(),
                insufficient_context: false,
            },
            Ok(_) => {
                warn!("generator returned an empty answer");
                self.insufficient()
            }
            Err(e) => {
                warn!(error = %e, "answer generation failed");
                self.insufficient()
            }
        }
    }

    fn insufficient(&self) -> GeneratedAnswer {
        GeneratedAnswer {
            text: self.insufficient_answer.clone(),
            citations: Vec::new(),
            insufficient_context: true,
        }
    }
}
