//! Error types for the retrieval subsystem.

use thiserror::Error;

/// Result alias for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Errors emitted by embedding and vector store components.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// An embedding vector failed validation.
    #[error("invalid embedding vector: {0}")]
    InvalidVector(&'static str),

    /// The embedding backend failed to produce vectors.
    #[error("embedding failed: {reason}")]
    Embedding {
        /// Human-readable reason describing the failure.
        reason: String,
    },

    /// The vector store could not be reached.
    #[error("vector store connection error: {reason}")]
    Connection {
        /// Human-readable reason describing the failure.
        reason: String,
    },

    /// A vector store call exceeded its deadline.
    #[error("vector store timeout: {reason}")]
    Timeout {
        /// Human-readable reason describing the failure.
        reason: String,
    },

    /// The vector store rejected the request.
    #[error("vector store error: {reason}")]
    Store {
        /// Human-readable reason describing the failure.
        reason: String,
    },
}

impl RetrievalError {
    /// Creates an embedding error from the supplied reason.
    #[must_use]
    pub fn embedding(reason: impl Into<String>) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }

    /// Creates a store error from the supplied reason.
    #[must_use]
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Returns whether the error class is worth a bounded retry.
    ///
    /// Connection and timeout failures are transient; validation, embedding,
    /// and application-level store errors fail fast.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}
