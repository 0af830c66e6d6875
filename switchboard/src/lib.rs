//! Switchboard: a guardrail-gated, retrieval-routed conversational agent
//! core.
//!
//! Each concern ships as its own crate and re-exports here behind a feature
//! flag. Typical embedders pull the default feature set and wire a
//! [`kernel::TurnEngine`] over their own model, embedding, vector store, and
//! checkpoint implementations.

#![warn(missing_docs, clippy::pedantic)]

/// Session ids, shared errors, and retry policies.
pub use switchboard_primitives as primitives;

/// Live tool registry and tool-card metadata.
#[cfg(feature = "tools")]
pub use switchboard_tools as tools;

/// Embeddings, vector store bindings, and the tool routing index.
#[cfg(feature = "retrieval")]
pub use switchboard_retrieval as retrieval;

/// Input/output guardrail checks and domain classification.
#[cfg(feature = "guard")]
pub use switchboard_guard as guard;

/// Chat-model adapter contract.
#[cfg(feature = "adapters")]
pub use switchboard_adapters as adapters;

/// Turn state machine and engine.
#[cfg(feature = "kernel")]
pub use switchboard_kernel as kernel;
