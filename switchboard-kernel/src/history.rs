//! History shaping before each model call.
//!
//! Trimming counts human-anchored turns, not raw messages, so a turn with a
//! long tool-call sequence still counts as one. Sanitation enforces the
//! orphan-reference invariant: a tool result whose originating call was
//! dropped as malformed must be dropped too.

use std::collections::HashSet;

use tracing::warn;

use switchboard_adapters::{ChatMessage, MessageRole};

/// Keeps only the most recent `max_turns` human-anchored turns.
#[must_use]
pub fn trim_to_recent_turns(messages: &[ChatMessage], max_turns: usize) -> Vec<ChatMessage> {
    let human_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, message)| message.role() == MessageRole::Human)
        .map(|(index, _)| index)
        .collect();

    if human_indices.len() <= max_turns || max_turns == 0 {
        return messages.to_vec();
    }

    let cutoff = human_indices[human_indices.len() - max_turns];
    messages[cutoff..].to_vec()
}

/// Drops malformed tool calls and orphan tool results from a history.
///
/// - assistant messages lose any tool call missing its name;
/// - an assistant message emptied by that repair (no calls, no content) is
///   dropped entirely;
/// - tool results whose originating call id no longer exists are dropped.
#[must_use]
pub fn sanitize_history(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let valid_call_ids: HashSet<String> = messages
        .iter()
        .flat_map(|message| message.tool_calls())
        .filter(|call| call.is_well_formed())
        .map(|call| call.id.clone())
        .collect();

    let mut cleaned = Vec::with_capacity(messages.len());
    for message in messages {
        if let Some(call_id) = message.tool_call_id()
            && !valid_call_ids.contains(call_id)
        {
            warn!(call_id, "dropping orphan tool result");
            continue;
        }

        if message.role() == MessageRole::Assistant
            && message.tool_calls().iter().any(|call| !call.is_well_formed())
        {
            match sanitize_response(message) {
                SanitizedResponse::Clean(repaired) | SanitizedResponse::Repaired(repaired) => {
                    cleaned.push(repaired);
                }
                SanitizedResponse::Dropped => {}
            }
            continue;
        }

        cleaned.push(message);
    }
    cleaned
}

/// Outcome of repairing a model response.
///
/// An explicit result instead of exception-driven control flow: the caller
/// decides what a dropped message means for routing.
#[derive(Clone, Debug)]
pub enum SanitizedResponse {
    /// The message needed no repair.
    Clean(ChatMessage),
    /// Malformed tool calls were stripped; usable content remains.
    Repaired(ChatMessage),
    /// Repair emptied the message; it must not be sent.
    Dropped,
}

/// Strips tool calls missing a name from a freshly generated response.
#[must_use]
pub fn sanitize_response(message: ChatMessage) -> SanitizedResponse {
    if message.tool_calls().iter().all(|call| call.is_well_formed()) {
        return SanitizedResponse::Clean(message);
    }

    let well_formed: Vec<_> = message
        .tool_calls()
        .iter()
        .filter(|call| call.is_well_formed())
        .cloned()
        .collect();
    let repaired_empty = well_formed.is_empty() && message.content().is_empty();
    if repaired_empty {
        warn!("model response emptied by tool-call repair, dropping");
        return SanitizedResponse::Dropped;
    }

    warn!(
        dropped = message.tool_calls().len() - well_formed.len(),
        "stripped malformed tool calls from model response"
    );
    SanitizedResponse::Repaired(message.with_tool_calls(well_formed))
}
