//! Reciprocal-rank fusion of several ranked result lists.
//!
//! # Algorithm
//!
//! 1. Order each input list by descending `relevance_score` (stable).
//! 2. A document at 1-based rank `r` in a list contributes `1 / (smoothing + r)`.
//! 3. Contributions are summed per [`DocumentKey`] across all lists. The payload
//!    kept for a key is the first one seen.
//! 4. Output is sorted by descending fused score; ties keep first-seen order.
//! 5. The fused score replaces `relevance_score`.

use std::collections::HashMap;

use crate::document::{Document, DocumentKey, descending_score};
use crate::error::{RagError, Result};

/// The smoothing constant used when none is configured.
pub const DEFAULT_SMOOTHING: u32 = 60;

/// Fuse ranked result lists into a single ranking.
///
/// Empty lists are skipped. The result is empty only when every list is.
///
/// # Errors
///
/// Returns [`RagError::InvalidParameter`] if `smoothing` is zero.
pub fn reciprocal_rank_fusion(lists: &[Vec<Document>], smoothing: u32) -> Result<Vec<Document>> {
    if smoothing == 0 {
        return Err(RagError::InvalidParameter(
            "fusion smoothing must be greater than zero".to_string(),
        ));
    }

    let mut slots: HashMap<DocumentKey, usize> = HashMap::new();
    let mut fused: Vec<(Document, f64)> = Vec::new();

    for list in lists.iter().filter(|l| !l.is_empty()) {
        for (rank, doc) in rank_order(list).into_iter().enumerate() {
            let contribution = 1.0 / (f64::from(smoothing) + (rank + 1) as f64);
            match slots.get(&doc.identity()) {
                Some(&slot) => fused[slot].1 += contribution,
                None => {
                    slots.insert(doc.identity(), fused.len());
                    fused.push((doc.clone(), contribution));
                }
            }
        }
    }

    // `sort_by` is stable, so equal scores stay in first-seen order.
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));

    Ok(fused
        .into_iter()
        .map(|(mut doc, score)| {
            doc.relevance_score = score;
            doc
        })
        .collect())
}

/// Order a list by descending score without disturbing the order of equal scores.
fn rank_order(list: &[Document]) -> Vec<&Document> {
    let mut ordered: Vec<&Document> = list.iter().collect();
    ordered.sort_by(|a, b| descending_score(a.relevance_score, b.relevance_score));
    ordered
}
