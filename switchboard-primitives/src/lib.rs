//! Core shared types for the switchboard agent core.

#![warn(missing_docs, clippy::pedantic)]

mod backoff;
mod error;
mod ids;

/// Bounded exponential backoff policy shared by model and store calls.
pub use backoff::RetryPolicy;
/// Error type and result alias shared across the workspace boundary.
pub use error::{Error, Result};
/// External session identifier keying persisted conversation state.
pub use ids::SessionId;
