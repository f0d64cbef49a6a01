//! Configuration for the retrieval loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::session::RetrievalParameters;

/// Reply used when there is no evidence to ground an answer in.
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "Sorry, not enough context was retrieved to answer this question.";

/// Query terms that suggest the answer lives outside the private corpus.
pub const DEFAULT_OPEN_WORLD_TRIGGERS: &[&str] = &[
    "最新",
    "新闻",
    "什么时候发布",
    "外部",
    "官网",
    "价格",
    "对比",
    "开源",
    "latest",
    "news",
    "release date",
    "official site",
    "pricing",
    "price",
    "compare",
    "comparison",
    "open source",
];

/// What to do when the grounding check flags unsupported claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HallucinationPolicy {
    /// Record the flag as a quality signal and finish.
    #[default]
    RecordOnly,
    /// Treat the flag as a failed gate and start another round.
    Retry,
}

/// Configuration parameters for the retrieval loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Shared ceiling on retry rounds across evidence and answer retries.
    pub max_rounds: u32,
    /// Retrieval parameters used on the first round.
    pub retrieval: RetrievalParameters,
    /// Documents scoring below this are dropped by the evidence filter.
    pub min_score: f64,
    /// How many documents to keep when none clears `min_score`.
    pub min_keep: usize,
    /// Mean raw score below which coverage counts as poor.
    pub coverage_floor: f64,
    /// Fewer surviving documents than this counts as poor coverage.
    pub min_evidence: usize,
    /// Queries shorter than this many characters are rewritten.
    pub refine_min_chars: usize,
    /// Also rewrite long queries on rounds after the first.
    pub rewrite_on_retry: bool,
    /// Answers with relevance below this fail the adequacy gate.
    pub answer_relevance_threshold: f64,
    pub hallucination_policy: HallucinationPolicy,
    pub open_world_triggers: Vec<String>,
    /// Citation snippet length, in characters.
    pub snippet_chars: usize,
    /// Per-document evidence preview length for answer grading, in characters.
    pub preview_chars: usize,
    /// Web result content is cut to this many characters.
    pub web_content_chars: usize,
    /// Upper bound on any single collaborator call, in milliseconds.
    pub call_timeout_ms: u64,
    pub insufficient_context_answer: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            retrieval: RetrievalParameters::default(),
            min_score: 0.2,
            min_keep: 3,
            coverage_floor: 0.15,
            min_evidence: 2,
            refine_min_chars: 6,
            rewrite_on_retry: false,
            answer_relevance_threshold: 0.5,
            hallucination_policy: HallucinationPolicy::RecordOnly,
            open_world_triggers: DEFAULT_OPEN_WORLD_TRIGGERS
                .iter()
                .map(|t| (*t).to_string())
                .collect(),
            snippet_chars: 180,
            preview_chars: 150,
            web_content_chars: 1200,
            call_timeout_ms: 30_000,
            insufficient_context_answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
        }
    }
}

impl LoopConfig {
    /// Create a new builder for constructing a [`LoopConfig`].
    pub fn builder() -> LoopConfigBuilder {
        LoopConfigBuilder::default()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Check that the parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] if:
    /// - `max_rounds == 0`
    /// - the retrieval parameters are invalid
    /// - `min_keep == 0`
    /// - `answer_relevance_threshold` is outside `[0, 1]`
    /// - `call_timeout_ms == 0`
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(RagError::InvalidParameter(
                "max_rounds must be greater than zero".to_string(),
            ));
        }
        self.retrieval.validate()?;
        if self.min_keep == 0 {
            return Err(RagError::InvalidParameter(
                "min_keep must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.answer_relevance_threshold) {
            return Err(RagError::InvalidParameter(format!(
                "answer_relevance_threshold ({}) must be within [0, 1]",
                self.answer_relevance_threshold
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(RagError::InvalidParameter(
                "call_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`LoopConfig`].
#[derive(Debug, Clone, Default)]
pub struct LoopConfigBuilder {
    config: LoopConfig,
}

impl LoopConfigBuilder {
    /// Set the shared round ceiling.
    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.config.max_rounds = rounds;
        self
    }

    /// Set the first-round retrieval parameters.
    pub fn retrieval(mut self, params: RetrievalParameters) -> Self {
        self.config.retrieval = params;
        self
    }

    /// Set the evidence score threshold and fallback keep count.
    pub fn evidence_threshold(mut self, min_score: f64, min_keep: usize) -> Self {
        self.config.min_score = min_score;
        self.config.min_keep = min_keep;
        self
    }

    /// Set the coverage floor and the minimum surviving evidence count.
    pub fn coverage(mut self, floor: f64, min_evidence: usize) -> Self {
        self.config.coverage_floor = floor;
        self.config.min_evidence = min_evidence;
        self
    }

    /// Set the query length under which refinement kicks in.
    pub fn refine_min_chars(mut self, chars: usize) -> Self {
        self.config.refine_min_chars = chars;
        self
    }

    /// Rewrite every query on retry rounds, not only short ones.
    pub fn rewrite_on_retry(mut self, enabled: bool) -> Self {
        self.config.rewrite_on_retry = enabled;
        self
    }

    /// Set the minimum answer relevance.
    pub fn answer_relevance_threshold(mut self, threshold: f64) -> Self {
        self.config.answer_relevance_threshold = threshold;
        self
    }

    /// Set how grounding failures are handled.
    pub fn hallucination_policy(mut self, policy: HallucinationPolicy) -> Self {
        self.config.hallucination_policy = policy;
        self
    }

    /// Replace the open-world trigger terms.
    pub fn open_world_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.open_world_triggers = triggers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the per-call collaborator timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the fixed reply used when no evidence is available.
    pub fn insufficient_context_answer(mut self, answer: impl Into<String>) -> Self {
        self.config.insufficient_context_answer = answer.into();
        self
    }

    /// Build the [`LoopConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`LoopConfig::validate`].
    pub fn build(self) -> Result<LoopConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
