//! Conversation turn state and the declarative update reducer.

use serde::{Deserialize, Serialize};

use switchboard_adapters::{ChatMessage, MessageRole};

/// Guardrail routing signal carried in the turn state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    /// The turn proceeds.
    #[default]
    Pass,
    /// The turn terminates with a refusal or safe fallback.
    Block,
    /// The output guardrail routed back to the agent for regeneration.
    Retry,
}

/// Per-node execution record. Absent fields are dropped on serialization so
/// each node only reports what it measured.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Name of the executed node.
    pub node: String,
    /// Wall-clock node duration in milliseconds.
    pub duration_ms: u64,
    /// Guardrail verdict or node action (pass/block/retry/skip/rewrite).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Block or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Number of tools bound to the model call (agent node).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_bound: Option<usize>,
    /// Retry counter after an output-guardrail failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Whether the turn was treated as a guardrail-passed follow-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_followup: Option<bool>,
    /// Whether the post-pass transform appended a disclaimer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclaimer_appended: Option<bool>,
    /// Whether internal tokens were scrubbed out of the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_tokens_removed: Option<bool>,
    /// Original utterance, recorded by the query rewriter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    /// Rewritten utterance, recorded by the query rewriter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten: Option<String>,
}

impl TraceEntry {
    /// Creates an entry for the named node.
    #[must_use]
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ..Self::default()
        }
    }
}

/// The unit of conversation state passed between state-machine nodes.
///
/// Created at session start, persisted by the checkpoint store, mutated only
/// through [`TurnState::apply`]. `conversation_started` flips true only on
/// an output-guardrail pass: a blocked turn must never mark the session as
/// started, or a short follow-up after a blocked first turn would skip
/// domain classification.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TurnState {
    /// Conversation history: human, assistant, tool-result, system entries.
    pub messages: Vec<ChatMessage>,
    /// Per-node execution records for the current turn.
    pub trace: Vec<TraceEntry>,
    /// Routing signal set by the guardrail nodes.
    pub guardrail_action: GuardrailAction,
    /// Canonicalized form of the latest utterance; retrieval-only, the
    /// original stays verbatim in `messages`.
    pub rewritten_query: Option<String>,
    /// Output-guardrail retry counter. Reset only at session creation.
    pub guardrail_retry_count: u32,
    /// Whether an output-guardrail-passed response has ever been sent.
    /// Monotonic within a session.
    pub conversation_started: bool,
}

/// Declarative diff returned by each node.
///
/// List fields merge; scalar fields overwrite only when present. Nodes never
/// mutate the state in place.
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    /// Messages to merge into history (append, or replace by matching id).
    pub messages: Vec<ChatMessage>,
    /// Trace entries to append.
    pub trace: Vec<TraceEntry>,
    /// New guardrail action, if the node routed.
    pub guardrail_action: Option<GuardrailAction>,
    /// New rewritten query, if the rewriter produced one.
    pub rewritten_query: Option<String>,
    /// New retry counter value, if the output guardrail bumped it.
    pub guardrail_retry_count: Option<u32>,
    /// New conversation-started flag, if the output guardrail passed.
    pub conversation_started: Option<bool>,
}

impl TurnState {
    /// Prepares the state for a new external invocation.
    ///
    /// Clears the previous turn's trace and rewritten query, resets the
    /// routing signal, and appends the new human utterance. The retry
    /// counter and `conversation_started` deliberately survive: the former
    /// is a session-scoped budget, the latter is the bypass invariant.
    pub fn begin_turn(&mut self, user_text: &str) {
        self.trace.clear();
        self.rewritten_query = None;
        self.guardrail_action = GuardrailAction::Pass;
        self.messages.push(ChatMessage::human(user_text));
    }

    /// Merges a node's update into the state.
    ///
    /// Messages with a known id replace the existing entry in place (the
    /// output guardrail amends the final answer this way); new ids append.
    /// Trace entries always append. Scalars overwrite when present.
    pub fn apply(&mut self, update: StateUpdate) {
        for message in update.messages {
            if let Some(existing) = self
                .messages
                .iter_mut()
                .find(|candidate| candidate.id() == message.id())
            {
                *existing = message;
            } else {
                self.messages.push(message);
            }
        }
        self.trace.extend(update.trace);
        if let Some(action) = update.guardrail_action {
            self.guardrail_action = action;
        }
        if let Some(rewritten) = update.rewritten_query {
            self.rewritten_query = Some(rewritten);
        }
        if let Some(count) = update.guardrail_retry_count {
            self.guardrail_retry_count = count;
        }
        if let Some(started) = update.conversation_started {
            self.conversation_started = started;
        }
    }

    /// Returns the content of the most recent non-empty human message.
    #[must_use]
    pub fn last_human_query(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|message| {
                message.role() == MessageRole::Human && !message.content().is_empty()
            })
            .map(|message| message.content().to_owned())
            .unwrap_or_default()
    }

    /// Returns the most recent message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Returns the tool names used so far, deduplicated, order-preserving.
    #[must_use]
    pub fn tools_used(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for message in &self.messages {
            if message.role() == MessageRole::Tool
                && let Some(name) = message.tool_name()
                && !name.is_empty()
                && !seen.iter().any(|existing| existing.as_str() == name)
            {
                seen.push(name.to_owned());
            }
        }
        seen
    }
}
