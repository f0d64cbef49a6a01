//! Checkpoint stores for inspecting and resuming sessions mid-loop.
//!
//! The [`Orchestrator`](crate::Orchestrator) writes the [`SessionState`] after
//! every transition and reads it back when a session starts. Writes are
//! last-write-wins.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{RagError, Result};
use crate::session::SessionState;

/// A store of session checkpoints keyed by session id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save `state` under `session_id`, replacing any previous checkpoint.
    async fn put(&self, session_id: &str, state: &SessionState) -> Result<()>;

    /// Load the latest checkpoint for `session_id`, if any.
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>>;
}

/// An in-process checkpoint store.
///
/// Checkpoints live as long as the store. Suitable for tests and
/// single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with a checkpoint.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, session_id: &str, state: &SessionState) -> Result<()> {
        self.sessions.write().await.insert(session_id.to_string(), state.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }
}

/// On-disk form of a checkpoint.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEnvelope {
    session_id: String,
    saved_at: DateTime<Utc>,
    state: SessionState,
}

/// A checkpoint store writing one JSON file per session into a directory.
///
/// Each write goes to its own temporary file first and is then renamed over
/// the previous checkpoint, so readers never see a partial file. A file that
/// cannot be decoded reads as no checkpoint.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    writes: AtomicU64,
}

impl FileCheckpointStore {
    /// Use `dir` for checkpoints, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Checkpoint`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            RagError::Checkpoint(format!("cannot create '{}': {e}", dir.display()))
        })?;
        Ok(Self { dir, writes: AtomicU64::new(0) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(session_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, session_id: &str, state: &SessionState) -> Result<()> {
        let envelope = CheckpointEnvelope {
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(|e| {
            RagError::Checkpoint(format!("cannot encode checkpoint for '{session_id}': {e}"))
        })?;

        let path = self.path_for(session_id);
        let seq = self.writes.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}-{seq}.tmp", std::process::id()));
        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            RagError::Checkpoint(format!("cannot write '{}': {e}", tmp.display()))
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(RagError::Checkpoint(format!(
                "cannot replace '{}': {e}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
        let path = self.path_for(session_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RagError::Checkpoint(format!(
                    "cannot read '{}': {e}",
                    path.display()
                )));
            }
        };
        match serde_json::from_slice::<CheckpointEnvelope>(&bytes) {
            Ok(envelope) => Ok(Some(envelope.state)),
            Err(e) => {
                warn!(session_id, path = %path.display(), error = %e, "corrupt checkpoint ignored");
                Ok(None)
            }
        }
    }
}

/// Map a session id to a file stem that is safe on every platform.
///
/// ASCII alphanumerics and `-` pass through; every other byte becomes `_xx`.
fn encode_file_stem(session_id: &str) -> String {
    let mut out = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "_{byte:02x}");
        }
    }
    if out.is_empty() { "_".to_string() } else { out }
}
