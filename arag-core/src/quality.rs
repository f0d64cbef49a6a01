//! Answer adequacy and grounding checks.
//!
//! Both checks delegate judgment to the [`Generator`] under a fixed output
//! schema. Callers decide what a failure means; see
//! [`Orchestrator`](crate::Orchestrator) for the retry policy.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::answer::CONTEXT_SEPARATOR;
use crate::deadline::bounded;
use crate::document::{Document, truncate_chars};
use crate::error::{RagError, Result};
use crate::llm::{Generator, OutputSchema, StructuredOutput, complete_typed};

/// The generator's verdict on an answer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnswerGrade {
    /// How relevant the answer is to the question, in `[0, 1]`.
    pub relevance: f64,
    /// Whether the answer reflects the provided context.
    pub uses_citations: bool,
    /// Whether the answer fully addresses the question.
    pub sufficient: bool,
}

impl AnswerGrade {
    /// The grade recorded when no judgment could be obtained.
    pub const FAILING: AnswerGrade =
        AnswerGrade { relevance: 0.0, uses_citations: false, sufficient: false };

    /// Whether the answer passes the adequacy gate.
    pub fn is_adequate(&self, relevance_threshold: f64) -> bool {
        self.relevance >= relevance_threshold && self.sufficient
    }
}

impl StructuredOutput for AnswerGrade {
    fn output_schema() -> OutputSchema {
        OutputSchema {
            name: "answer_grade",
            schema: json!({
                "type": "object",
                "properties": {
                    "relevance": {
                        "type": "number",
                        "description": "0~1; is the answer relevant to the question?"
                    },
                    "uses_citations": {
                        "type": "boolean",
                        "description": "Does the answer reflect the provided context?"
                    },
                    "sufficient": {
                        "type": "boolean",
                        "description": "Is the answer sufficient to address the user question?"
                    }
                },
                "required": ["relevance", "uses_citations", "sufficient"],
                "additionalProperties": false
            }),
        }
    }
}

/// The generator's verdict on whether an answer is supported by its evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingGrade {
    /// True if the answer includes claims not supported by the context.
    pub hallucination: bool,
}

impl StructuredOutput for GroundingGrade {
    fn output_schema() -> OutputSchema {
        OutputSchema {
            name: "grounding_grade",
            schema: json!({
                "type": "object",
                "properties": {
                    "hallucination": {
                        "type": "boolean",
                        "description": "true if the answer includes claims not supported by context"
                    }
                },
                "required": ["hallucination"],
                "additionalProperties": false
            }),
        }
    }
}

/// Grades answers and checks their grounding.
#[derive(Clone)]
pub struct QualityGate {
    generator: Arc<dyn Generator>,
    relevance_threshold: f64,
    preview_chars: usize,
    call_timeout: Duration,
}

impl QualityGate {
    pub fn new(
        generator: Arc<dyn Generator>,
        relevance_threshold: f64,
        preview_chars: usize,
        call_timeout: Duration,
    ) -> Self {
        Self { generator, relevance_threshold, preview_chars, call_timeout }
    }

    pub fn relevance_threshold(&self) -> f64 {
        self.relevance_threshold
    }

    /// Grade `answer` to `question` against a preview of `evidence`.
    ///
    /// The returned relevance is clamped to `[0, 1]`; a non-finite value
    /// becomes `0.0`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationUnavailable`] if the generator fails, times
    /// out, or returns a record that does not fit the schema.
    pub async fn grade_answer(
        &self,
        question: &str,
        evidence: &[Document],
        answer: &str,
    ) -> Result<AnswerGrade> {
        let prompt = format!(
            "Question:\n{question}\n\nContext Preview:\n{preview}\n\nAnswer:\n{answer}\n\n\
             Evaluate:\n\
             - relevance (0~1)\n\
             - uses_citations (true/false)\n\
             - sufficient (true/false)\n\
             Return JSON with keys: relevance, uses_citations, sufficient",
            preview = render_preview(evidence, self.preview_chars),
        );

        let mut grade: AnswerGrade = self.ask(&prompt, "answer grading").await?;
        grade.relevance =
            if grade.relevance.is_finite() { grade.relevance.clamp(0.0, 1.0) } else { 0.0 };
        debug!(
            relevance = grade.relevance,
            sufficient = grade.sufficient,
            adequate = grade.is_adequate(self.relevance_threshold),
            "answer graded"
        );
        Ok(grade)
    }

    /// Check whether `answer` makes claims `evidence` does not support.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationUnavailable`] on generator failure.
    pub async fn check_grounding(&self, evidence: &[Document], answer: &str) -> Result<GroundingGrade> {
        let context = evidence
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let prompt = format!(
            "Given the context and the answer, determine if the answer contains unsupported claims.\n\n\
             Context:\n{context}\n\nAnswer:\n{answer}\n\n\
             Return JSON: {{\"hallucination\": true/false}}"
        );

        let grade: GroundingGrade = self.ask(&prompt, "grounding check").await?;
        debug!(hallucination = grade.hallucination, "grounding checked");
        Ok(grade)
    }

    async fn ask<T: StructuredOutput>(&self, prompt: &str, what: &str) -> Result<T> {
        bounded(self.call_timeout, complete_typed::<T>(self.generator.as_ref(), prompt), |after| {
            RagError::generation(format!("{what} timed out after {after:?}"))
        })
        .await
    }
}

/// The first `max_chars` characters of each document, separated like the
/// generation context.
pub fn render_preview(evidence: &[Document], max_chars: usize) -> String {
    evidence
        .iter()
        .map(|d| truncate_chars(&d.content, max_chars, ""))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}
