//! Error types for guardrail configuration.

use thiserror::Error;

/// Result alias for guardrail construction.
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors raised while building guardrail components.
#[derive(Debug, Error)]
pub enum GuardError {
    /// A check pattern failed to compile.
    #[error("invalid guardrail pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// The offending pattern text.
        pattern: String,
        /// Source regex compilation error.
        source: regex::Error,
    },
}

impl GuardError {
    pub(crate) fn pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }
}
