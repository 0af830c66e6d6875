//! Turn state machine: guardrail-gated orchestration around the model call.
//!
//! One turn flows `input_guardrail → query_rewriter → agent ⇄ tools →
//! output_guardrail`, with conditional edges out of both guardrails and a
//! recursion cap bounding the agent⇄tools cycle. Nodes never mutate shared
//! state: each returns a [`StateUpdate`] diff that the reducer merges (list
//! fields merge, scalar fields overwrite).

#![warn(missing_docs, clippy::pedantic)]

mod checkpoint;
mod engine;
mod error;
pub mod history;
pub mod state;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use engine::{EngineConfig, TurnEngine, TurnOutcome, FALLBACK_RESPONSE};
pub use error::{KernelError, KernelResult};
pub use history::{sanitize_history, sanitize_response, trim_to_recent_turns, SanitizedResponse};
pub use state::{GuardrailAction, StateUpdate, TraceEntry, TurnState};
