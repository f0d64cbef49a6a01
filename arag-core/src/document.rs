//! Data types for retrieved evidence and citations.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Page number used for sources that have no pages (web results, plain text).
pub const UNPAGED: i64 = -1;

/// Keywords assigned to documents that came from the web fallback.
pub const WEB_KEYWORDS: &str = "web";

/// A retrieved evidence unit.
///
/// `relevance_score` is set by whatever produced the document: the raw backend
/// score for dense and lexical retrieval, or the fused rank score after
/// [`reciprocal_rank_fusion`](crate::fusion::reciprocal_rank_fusion). Higher is
/// always more relevant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// The text content of the passage.
    pub content: String,
    /// Identifier of the originating source (file name, URL, ...).
    pub source: String,
    /// Page within the source, or [`UNPAGED`].
    #[serde(default = "unpaged")]
    pub page_number: i64,
    /// Comma-joined keyword list. May be empty.
    #[serde(default)]
    pub keywords: String,
    /// Strategy-specific relevance score.
    #[serde(default)]
    pub relevance_score: f64,
}

fn unpaged() -> i64 {
    UNPAGED
}

impl Document {
    /// Create a document with an explicit score.
    pub fn new(
        content: impl Into<String>,
        source: impl Into<String>,
        page_number: i64,
        relevance_score: f64,
    ) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            page_number,
            keywords: String::new(),
            relevance_score,
        }
    }

    /// Set the keyword list.
    pub fn with_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = keywords.into();
        self
    }

    /// The merge key used when the same passage is returned by several strategies.
    pub fn identity(&self) -> DocumentKey {
        DocumentKey { source: self.source.clone(), page_number: self.page_number }
    }

    /// Whether this document came from a paged source.
    pub fn is_paged(&self) -> bool {
        self.page_number != UNPAGED
    }
}

/// Identity of a passage across result lists: `(source, page_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Originating source.
    pub source: String,
    /// Page within the source.
    pub page_number: i64,
}

/// A read-only projection of a [`Document`] for presentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub source: String,
    pub page_number: i64,
    pub keywords: String,
    pub score: f64,
    pub snippet: String,
}

impl Citation {
    /// Project a document, keeping at most `snippet_chars` characters of content.
    ///
    /// An ellipsis is appended when the content was cut.
    pub fn from_document(doc: &Document, snippet_chars: usize) -> Self {
        Self {
            source: doc.source.clone(),
            page_number: doc.page_number,
            keywords: doc.keywords.clone(),
            score: doc.relevance_score,
            snippet: truncate_chars(&doc.content, snippet_chars, "..."),
        }
    }
}

/// Take the first `max_chars` characters of `text`, appending `suffix` if anything was dropped.
///
/// Counts `char`s, not bytes, so multi-byte text is never split mid-codepoint.
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{suffix}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Order two scores descending, with NaN after every number.
pub fn descending_score(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.total_cmp(&a),
    }
}
