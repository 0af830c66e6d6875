//! Shared error definitions for switchboard primitives.

use thiserror::Error;

/// Result alias used by primitive types.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while manipulating primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied session identifier failed validation.
    #[error("invalid session id `{id}`: {reason}")]
    InvalidSessionId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },
}
