//! Per-turn session state threaded through the loop.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::{Citation, Document};
use crate::error::{RagError, Result};
use crate::evidence::CoverageAssessment;
use crate::fusion::DEFAULT_SMOOTHING;
use crate::stage::{Gate, Stage, TransitionRecord};

/// How documents are retrieved for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Embedding similarity only.
    Dense,
    /// Term-based (BM25) only.
    Lexical,
    /// Dense and lexical fused with reciprocal-rank fusion.
    #[default]
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Dense => "dense",
            Strategy::Lexical => "lexical",
            Strategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" => Ok(Strategy::Dense),
            "lexical" | "bm25" | "sparse" => Ok(Strategy::Lexical),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(RagError::InvalidParameter(format!(
                "unknown retrieval strategy '{other}'; use dense, lexical or hybrid"
            ))),
        }
    }
}

/// Default scalar filter: every chunk that has a real page.
pub const DEFAULT_FILTER: &str = "page_number >= 1";

/// Default number of documents fetched per strategy.
pub const DEFAULT_TOP_K: usize = 5;

/// Parameters for one retrieval call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalParameters {
    pub strategy: Strategy,
    pub top_k: usize,
    /// Reciprocal-rank smoothing constant. Only used by [`Strategy::Hybrid`].
    pub fusion_smoothing: u32,
    /// Backend-specific scalar filter, passed through untouched.
    pub filter_expression: String,
}

impl Default for RetrievalParameters {
    fn default() -> Self {
        Self {
            strategy: Strategy::Hybrid,
            top_k: DEFAULT_TOP_K,
            fusion_smoothing: DEFAULT_SMOOTHING,
            filter_expression: DEFAULT_FILTER.to_string(),
        }
    }
}

impl RetrievalParameters {
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] if `top_k` or `fusion_smoothing` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::InvalidParameter("top_k must be greater than zero".to_string()));
        }
        if self.fusion_smoothing == 0 {
            return Err(RagError::InvalidParameter(
                "fusion_smoothing must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A recorded quality metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    Bool(bool),
    Count(i64),
    Score(f64),
}

impl From<bool> for Signal {
    fn from(value: bool) -> Self {
        Signal::Bool(value)
    }
}

impl From<usize> for Signal {
    fn from(value: usize) -> Self {
        Signal::Count(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Signal {
    fn from(value: f64) -> Self {
        Signal::Score(value)
    }
}

/// Names of the signals the loop records.
pub mod signals {
    pub const RELEVANCY_AVERAGE: &str = "relevancy_average";
    pub const DOCUMENTS_KEPT: &str = "documents_kept";
    pub const DOCUMENTS_TOTAL: &str = "documents_total";
    pub const WEB_RESULTS: &str = "web_results";
    pub const ANSWER_RELEVANCE: &str = "answer_relevance";
    pub const ANSWER_USES_CITATIONS: &str = "answer_uses_citations";
    pub const ANSWER_SUFFICIENT: &str = "answer_sufficient";
    pub const HALLUCINATION: &str = "hallucination";
}

/// Named quality metrics accumulated over a session.
///
/// Keys are never removed. Recording an existing name overwrites its value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualitySignals(BTreeMap<String, Signal>);

impl QualitySignals {
    pub fn record(&mut self, name: &str, value: impl Into<Signal>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<Signal> {
        self.0.get(name).copied()
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Signal::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn score(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            Signal::Score(s) => Some(s),
            Signal::Count(c) => Some(c as f64),
            Signal::Bool(_) => None,
        }
    }

    pub fn count(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Signal::Count(c) => Some(c),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Signal)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Summary of one evidence grading pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: u32,
    pub query: String,
    pub strategy: Strategy,
    pub retrieved: usize,
    pub kept: usize,
    pub average_score: f64,
    pub need_more_evidence: bool,
}

/// The unit of work threaded through the [`Orchestrator`](crate::Orchestrator).
///
/// One exists per user turn. Each stage reads and writes only the fields it
/// owns; see the stage handlers in `orchestrator.rs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub original_query: String,
    pub current_query: String,
    /// Unset until the first `PLAN_ROUTE`, then sticky across rounds.
    pub retrieval_parameters: Option<RetrievalParameters>,
    pub raw_documents: Vec<Document>,
    pub evidence_set: Vec<Document>,
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub needs_web_fallback: bool,
    /// Set when `answer_text` is the fixed insufficient-context reply.
    pub insufficient_context: bool,
    pub quality: QualitySignals,
    pub round_count: u32,
    pub stage: Stage,
    pub trail: Vec<TransitionRecord>,
    pub rounds: Vec<RoundRecord>,
}

impl SessionState {
    /// Start a new turn at [`Stage::RefineQuery`].
    pub fn new(session_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        let user_input = user_input.into();
        Self {
            session_id: session_id.into(),
            original_query: user_input.clone(),
            current_query: user_input,
            retrieval_parameters: None,
            raw_documents: Vec::new(),
            evidence_set: Vec::new(),
            answer_text: String::new(),
            citations: Vec::new(),
            needs_web_fallback: false,
            insufficient_context: false,
            quality: QualitySignals::default(),
            round_count: 0,
            stage: Stage::RefineQuery,
            trail: Vec::new(),
            rounds: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Turn a gate predicate into a [`Gate`], consuming a round on failure.
    ///
    /// The counter saturates at `ceiling`; reaching it yields [`Gate::Exhausted`].
    pub fn gate(&mut self, failed: bool, web_fallback: bool, ceiling: u32) -> Gate {
        if !failed {
            return Gate::Pass;
        }
        if self.round_count < ceiling {
            self.round_count += 1;
        }
        if self.round_count >= ceiling { Gate::Exhausted } else { Gate::Retry { web_fallback } }
    }

    /// Move to `to` and append the transition to the trail.
    pub fn advance(&mut self, to: Stage) {
        self.trail.push(TransitionRecord { from: self.stage, to, round_count: self.round_count });
        self.stage = to;
    }

    pub(crate) fn record_coverage(&mut self, assessment: &CoverageAssessment) {
        self.quality.record(signals::RELEVANCY_AVERAGE, assessment.average_score);
        self.quality.record(signals::DOCUMENTS_KEPT, assessment.kept);
        self.quality.record(signals::DOCUMENTS_TOTAL, assessment.total);

        let strategy = self.retrieval_parameters.as_ref().map(|p| p.strategy).unwrap_or_default();
        self.rounds.push(RoundRecord {
            round: self.round_count,
            query: self.current_query.clone(),
            strategy,
            retrieved: assessment.total,
            kept: assessment.kept,
            average_score: assessment.average_score,
            need_more_evidence: assessment.need_more_evidence,
        });
    }
}
