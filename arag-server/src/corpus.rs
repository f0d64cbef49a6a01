//! Corpus files loaded into the search backend at start.
//!
//! A corpus is either a JSON array of records or one JSON record per line:
//!
//! ```json
//! {"content": "Parking is free after 22:00.", "source": "guide.pdf", "page_number": 3, "keywords": "parking"}
//! ```
//!
//! `page_number` defaults to 1 and `keywords` to empty.

use std::path::{Path, PathBuf};

use arag_core::Document;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid corpus record at line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid corpus array: {0}")]
    Array(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct CorpusRecord {
    content: String,
    source: String,
    #[serde(default = "first_page")]
    page_number: i64,
    #[serde(default)]
    keywords: String,
}

fn first_page() -> i64 {
    1
}

impl From<CorpusRecord> for Document {
    fn from(record: CorpusRecord) -> Self {
        Document::new(record.content, record.source, record.page_number, 0.0)
            .with_keywords(record.keywords)
    }
}

/// Read and parse a corpus file.
pub async fn load_corpus(path: &Path) -> Result<Vec<Document>, CorpusError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CorpusError::Io { path: path.to_path_buf(), source })?;
    parse_corpus(&raw)
}

/// Parse corpus text; blank records are skipped.
pub fn parse_corpus(raw: &str) -> Result<Vec<Document>, CorpusError> {
    let records: Vec<CorpusRecord> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).map_err(CorpusError::Array)?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line)
                    .map_err(|source| CorpusError::Record { line: index + 1, source })
            })
            .collect::<Result<_, _>>()?
    };

    Ok(records
        .into_iter()
        .filter(|r| !r.content.trim().is_empty())
        .map(Document::from)
        .collect())
}
