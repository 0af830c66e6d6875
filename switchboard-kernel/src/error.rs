//! Error types for the turn kernel.

use thiserror::Error;

use switchboard_adapters::AdapterError;
use switchboard_guard::GuardError;
use switchboard_retrieval::RetrievalError;
use switchboard_tools::ToolError;

/// Result alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors surfaced by the turn engine.
///
/// Policy violations never appear here: they are handled in-band by the
/// state machine. These are pipeline failures: exhausted provider retries,
/// checkpoint trouble, or a runaway tool-call loop.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Tool registration or lookup failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Model adapter failed beyond its retry budget.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Retrieval index failed outside the degradable search path.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// A guardrail component failed to initialize.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Conversation state could not be loaded or persisted.
    #[error("checkpoint store failure: {reason}")]
    Checkpoint {
        /// Human-readable reason describing the failure.
        reason: String,
    },

    /// The agent⇄tools cycle exceeded the per-turn iteration cap.
    #[error("turn exceeded recursion limit of {limit} node executions")]
    RecursionLimit {
        /// The configured cap.
        limit: usize,
    },
}

impl KernelError {
    /// Creates a checkpoint error from the supplied reason.
    #[must_use]
    pub fn checkpoint(reason: impl Into<String>) -> Self {
        Self::Checkpoint {
            reason: reason.into(),
        }
    }
}
