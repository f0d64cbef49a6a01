//! Score-based evidence filtering and coverage assessment.

use serde::{Deserialize, Serialize};

use crate::config::LoopConfig;
use crate::document::{Document, descending_score};

/// Keep documents scoring at least `min_score`, falling back to the best `min_keep`.
///
/// The result is sorted by descending score. When at least one document clears
/// the threshold, every such document is returned with no further truncation.
/// When none does, the top `min_keep` documents are returned regardless of
/// score. The result is empty only when `docs` is.
pub fn filter_by_score(docs: &[Document], min_score: f64, min_keep: usize) -> Vec<Document> {
    let mut sorted = docs.to_vec();
    sorted.sort_by(|a, b| descending_score(a.relevance_score, b.relevance_score));

    let kept: Vec<Document> =
        sorted.iter().filter(|d| d.relevance_score >= min_score).cloned().collect();
    if !kept.is_empty() {
        return kept;
    }
    sorted.truncate(min_keep);
    sorted
}

/// Mean `relevance_score` over `docs`, or `0.0` for an empty slice.
pub fn average_score(docs: &[Document]) -> f64 {
    if docs.is_empty() {
        return 0.0;
    }
    docs.iter().map(|d| d.relevance_score).sum::<f64>() / docs.len() as f64
}

/// Outcome of grading one round's raw documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoverageAssessment {
    /// Mean score over the unfiltered documents.
    pub average_score: f64,
    /// Documents that survived filtering.
    pub kept: usize,
    /// Documents before filtering.
    pub total: usize,
    /// Whether the loop should try to gather better evidence.
    pub need_more_evidence: bool,
}

/// Filters a round's documents and decides whether coverage is adequate.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceFilter {
    min_score: f64,
    min_keep: usize,
    coverage_floor: f64,
    min_evidence: usize,
}

impl EvidenceFilter {
    pub fn new(min_score: f64, min_keep: usize, coverage_floor: f64, min_evidence: usize) -> Self {
        Self { min_score, min_keep, coverage_floor, min_evidence }
    }

    pub fn from_config(config: &LoopConfig) -> Self {
        Self::new(config.min_score, config.min_keep, config.coverage_floor, config.min_evidence)
    }

    /// Filter `docs` and assess coverage.
    ///
    /// More evidence is needed when fewer than `min_evidence` documents survive
    /// or the pre-filter average falls below `coverage_floor`.
    pub fn grade(&self, docs: &[Document]) -> (Vec<Document>, CoverageAssessment) {
        let average = average_score(docs);
        let evidence = filter_by_score(docs, self.min_score, self.min_keep);
        let need_more_evidence =
            evidence.len() < self.min_evidence || average < self.coverage_floor;

        let assessment = CoverageAssessment {
            average_score: average,
            kept: evidence.len(),
            total: docs.len(),
            need_more_evidence,
        };
        (evidence, assessment)
    }
}

impl Default for EvidenceFilter {
    fn default() -> Self {
        Self::from_config(&LoopConfig::default())
    }
}
