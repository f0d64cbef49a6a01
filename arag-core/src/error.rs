//! Error types for the `arag-core` crate.

use thiserror::Error;

/// Errors that can occur in the adaptive retrieval loop.
///
/// Only [`RagError::InvalidParameter`] and [`RagError::Checkpoint`] escape
/// [`Orchestrator::answer`](crate::Orchestrator::answer). Every other variant is
/// recovered by the stage that produced it. Checkpoint stores report encode and
/// I/O faults as [`RagError::Checkpoint`]; a checkpoint that cannot be decoded
/// reads as absent.
#[derive(Debug, Error)]
pub enum RagError {
    /// Malformed configuration or retrieval parameters.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A retrieval backend call failed or timed out.
    #[error("Retrieval unavailable ({backend}): {message}")]
    RetrievalUnavailable {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The generation collaborator failed or timed out.
    #[error("Generation unavailable: {message}")]
    GenerationUnavailable {
        /// A description of the failure.
        message: String,
    },

    /// The web search collaborator failed or timed out.
    #[error("Web search unavailable ({provider}): {message}")]
    WebSearchUnavailable {
        /// The web search provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The checkpoint store could not read or write a session.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Shorthand for a [`RagError::GenerationUnavailable`].
    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationUnavailable { message: message.into() }
    }

    /// Whether this error is a configuration defect that must not be recovered.
    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, Self::InvalidParameter(_))
    }
}

/// A convenience result type for retrieval loop operations.
pub type Result<T> = std::result::Result<T, RagError>;
