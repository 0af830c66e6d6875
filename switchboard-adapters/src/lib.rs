//! Language-model adapter contract.
//!
//! The model is a black-box collaborator: it receives ordered messages plus
//! optional tool schemas and returns either final-answer text or structured
//! tool-call requests. Concrete provider adapters live outside this core;
//! the [`ScriptedChatModel`] ships for tests and demos.

#![warn(missing_docs, clippy::pedantic)]

mod retry;
mod scripted;
pub mod traits;

pub use retry::invoke_with_retry;
pub use scripted::ScriptedChatModel;
pub use traits::{
    AdapterError, AdapterMetadata, AdapterResult, AdapterStream, ChatMessage, ChatModel,
    InferenceChunk, InferenceRequest, MessageRole, ToolCallRequest, ToolSchema,
};
