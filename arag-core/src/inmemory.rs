//! In-memory search backend with cosine and BM25 scoring.
//!
//! This module provides [`InMemorySearchBackend`], a [`SearchBackend`] backed by
//! a `Vec` protected by a `tokio::sync::RwLock`. It is suitable for
//! development, testing, and corpora small enough to scan per query.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{SearchBackend, SearchMode, SearchRequest};
use crate::document::Document;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::expr::FilterExpr;

const BACKEND_NAME: &str = "in-memory";

/// BM25 term-frequency saturation.
const BM25_K1: f64 = 1.2;
/// BM25 length normalization.
const BM25_B: f64 = 0.75;

#[derive(Debug, Clone)]
struct IndexedDocument {
    document: Document,
    embedding: Option<Vec<f32>>,
    term_counts: HashMap<String, u32>,
    length: usize,
}

/// An in-memory search backend.
///
/// Dense search embeds the query with the configured [`EmbeddingProvider`] and
/// ranks by cosine similarity. Lexical search ranks by BM25 over the terms
/// produced by [`tokenize`]. Both apply the request's [`FilterExpr`] first.
///
/// # Example
///
/// ```rust,ignore
/// use arag_core::{Document, InMemorySearchBackend};
///
/// let backend = InMemorySearchBackend::with_embedder(embedder);
/// backend.add_documents(vec![Document::new("增值服务说明", "wanda.pdf", 3, 0.0)]).await?;
/// ```
#[derive(Default)]
pub struct InMemorySearchBackend {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    entries: RwLock<Vec<IndexedDocument>>,
}

impl InMemorySearchBackend {
    /// Create a backend that supports lexical search only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that supports both modes.
    pub fn with_embedder(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder: Some(embedder), entries: RwLock::default() }
    }

    /// Index `documents`, embedding them if an embedder is configured.
    ///
    /// Returns the number of documents added.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if embedding fails; nothing is
    /// indexed in that case.
    pub async fn add_documents(&self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let embeddings: Vec<Option<Vec<f32>>> = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
                let vectors = embedder.embed_batch(&texts).await?;
                if vectors.len() != documents.len() {
                    return Err(RagError::EmbeddingError {
                        provider: BACKEND_NAME.to_string(),
                        message: format!(
                            "expected {} embeddings, got {}",
                            documents.len(),
                            vectors.len()
                        ),
                    });
                }
                vectors.into_iter().map(Some).collect()
            }
            None => vec![None; documents.len()],
        };

        let indexed: Vec<IndexedDocument> = documents
            .into_iter()
            .zip(embeddings)
            .map(|(document, embedding)| {
                let terms = tokenize(&document.content);
                let length = terms.len();
                let mut term_counts = HashMap::new();
                for term in terms {
                    *term_counts.entry(term).or_insert(0) += 1;
                }
                IndexedDocument { document, embedding, term_counts, length }
            })
            .collect();

        let added = indexed.len();
        let mut entries = self.entries.write().await;
        entries.extend(indexed);
        debug!(added, total = entries.len(), "indexed documents");
        Ok(added)
    }

    /// Number of indexed documents.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn dense(&self, query: &str, filter: &FilterExpr, top_k: usize) -> Result<Vec<Document>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| RagError::RetrievalUnavailable {
            backend: BACKEND_NAME.to_string(),
            message: "dense search requires an embedding provider".to_string(),
        })?;
        let query_embedding = embedder.embed(query).await.map_err(|e| {
            RagError::RetrievalUnavailable {
                backend: BACKEND_NAME.to_string(),
                message: format!("query embedding failed: {e}"),
            }
        })?;

        let entries = self.entries.read().await;
        let mut scored: Vec<Document> = entries
            .iter()
            .filter(|e| filter.matches(&e.document))
            .filter_map(|e| {
                let embedding = e.embedding.as_deref()?;
                let mut doc = e.document.clone();
                doc.relevance_score = f64::from(cosine_similarity(embedding, &query_embedding));
                Some(doc)
            })
            .collect();

        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn lexical(&self, query: &str, filter: &FilterExpr, top_k: usize) -> Vec<Document> {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let entries = self.entries.read().await;
        let candidates: Vec<&IndexedDocument> =
            entries.iter().filter(|e| filter.matches(&e.document)).collect();
        if candidates.is_empty() || query_terms.is_empty() {
            return Vec::new();
        }

        let n = candidates.len() as f64;
        let avg_len = candidates.iter().map(|e| e.length).sum::<usize>() as f64 / n;
        let idf: Vec<f64> = query_terms
            .iter()
            .map(|term| {
                let df = candidates.iter().filter(|e| e.term_counts.contains_key(term)).count();
                let df = df as f64;
                (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
            })
            .collect();

        let mut scored: Vec<Document> = candidates
            .iter()
            .filter_map(|e| {
                let norm = if avg_len > 0.0 { e.length as f64 / avg_len } else { 0.0 };
                let score: f64 = query_terms
                    .iter()
                    .zip(&idf)
                    .filter_map(|(term, idf)| {
                        let tf = f64::from(*e.term_counts.get(term)?);
                        Some(idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm)))
                    })
                    .sum();
                (score > 0.0).then(|| {
                    let mut doc = e.document.clone();
                    doc.relevance_score = score;
                    doc
                })
            })
            .collect();

        scored.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scored.truncate(top_k);
        scored
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<Document>> {
        let filter = FilterExpr::parse(request.filter)?;
        match request.mode {
            SearchMode::Dense => self.dense(request.query, &filter, request.top_k).await,
            SearchMode::Lexical => Ok(self.lexical(request.query, &filter, request.top_k).await),
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Split text into lowercase lexical terms.
///
/// Runs of alphanumerics form one term. Every CJK ideograph is a term of its
/// own, since the text has no spaces between words.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                terms.push(std::mem::take(&mut word));
            }
            terms.push(c.to_string());
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
        } else if !word.is_empty() {
            terms.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        terms.push(word);
    }
    terms
}

fn is_cjk(c: char) -> bool {
    matches!(
        u32::from(c),
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF | 0x3040..=0x30FF
    )
}
