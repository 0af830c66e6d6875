//! Turn engine: node graph, routing, and the public entry point.
//!
//! ```text
//! input_guardrail ──(block)──→ END
//!   │(pass)
//!   ▼
//! query_rewriter → agent ⇄ tools
//!                    │(final answer)
//!                    ▼
//!             output_guardrail ──(retry)──→ agent
//!                    │(pass/block)
//!                    ▼
//!                   END
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use switchboard_adapters::{
    invoke_with_retry, ChatMessage, ChatModel, InferenceRequest, MessageRole, ToolSchema,
};
use switchboard_guard::{
    DomainClassifier, InjectionScreen, OutputScreen, ResponsePolicy, SAFE_RESPONSE,
};
use switchboard_primitives::{RetryPolicy, SessionId};
use switchboard_retrieval::{ReindexReport, ToolIndex, ToolSpec};
use switchboard_tools::card::{CardRegistry, ToolCard};
use switchboard_tools::registry::{Tool, ToolHandle, ToolMetadata, ToolRegistry};

use crate::checkpoint::CheckpointStore;
use crate::history::{sanitize_history, sanitize_response, trim_to_recent_turns, SanitizedResponse};
use crate::state::{GuardrailAction, StateUpdate, TraceEntry, TurnState};
use crate::{KernelError, KernelResult};

/// Fixed, non-technical message shown when a turn fails unrecoverably.
pub const FALLBACK_RESPONSE: &str =
    "죄송합니다. 일시적인 문제로 답변을 드리지 못했습니다. 잠시 후 다시 질문해 주세요.";

const ANSWER_SYSTEM_PROMPT: &str = "당신은 라이나생명의 보험 상담 챗봇입니다.\n\
    - 보험 상품, 보험료, 보장 내용, 인수심사, 청구 절차에 대해서만 답변하세요.\n\
    - 정보가 필요하면 제공된 도구를 호출하고, 도구 결과에 근거해 답변하세요.\n\
    - 도구 결과에 없는 수치나 조건을 지어내지 마세요.\n\
    - 확정적인 가입 가능 여부나 지급 여부를 단정하지 말고, 심사와 약관 기준임을 안내하세요.\n\
    - 보험과 무관한 질문에는 보험 관련 질문을 요청하는 안내로 답하세요.";

const REWRITE_SYSTEM_PROMPT: &str = "당신은 보험 상담 챗봇의 질문 명확화 도우미입니다.\n\
    사용자의 짧거나 문맥 의존적인 후속 질문을, 이전 대화를 참고하여 완전하고 독립적인 질문으로 재작성하세요.\n\
    규칙:\n\
    - 재작성된 질문 한 줄만 출력하세요.\n\
    - 설명·따옴표·번호는 포함하지 마세요.\n\
    - 원래 의도를 바꾸지 마세요.\n\
    - 재작성이 불필요하면 원문 그대로 출력하세요.\n\
    - 챗봇이 추가 정보(성별, 나이, 상품명 등)를 물었고 사용자가 단답으로 응답한 경우, \
    그 정보를 이전 요청에 합쳐서 완전한 질문으로 만드세요.";

/// Single-character answers that still carry meaning for the rewriter
/// (confirmations and gender answers to an underwriting question).
const MEANINGFUL_SINGLES: &[&str] = &["네", "예", "응", "M", "F", "남", "여"];

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// System prompt prepended to every agent call.
    pub system_prompt: String,
    /// History window in human-anchored turns.
    pub max_conversation_turns: usize,
    /// Queries shorter than this many characters are rewrite candidates.
    pub rewrite_char_threshold: usize,
    /// Cap on node executions per turn; bounds the agent⇄tools cycle.
    pub recursion_limit: usize,
    /// Output-guardrail retry budget per session.
    pub max_output_retries: u32,
    /// Candidate count for tool retrieval (`None` uses the index default).
    pub top_k: Option<usize>,
    /// Sampling temperature for agent calls.
    pub temperature: f32,
    /// Output token budget for agent calls.
    pub max_output_tokens: u32,
    /// Retry policy for model calls.
    pub model_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: ANSWER_SYSTEM_PROMPT.to_owned(),
            max_conversation_turns: 20,
            rewrite_char_threshold: 15,
            recursion_limit: 30,
            max_output_retries: 1,
            top_k: None,
            temperature: 0.2,
            max_output_tokens: 2048,
            model_retry: RetryPolicy::model(),
        }
    }
}

/// What one external invocation returns to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Final visible response text.
    pub answer: String,
    /// Tools used during the turn, deduplicated, order-preserving.
    pub tools_used: Vec<String>,
    /// Per-node execution records for the turn.
    pub trace: Vec<TraceEntry>,
}

/// Orchestrates one turn through the guardrail-gated node graph.
///
/// Constructed once at process start and shared by reference; all mutable
/// resources (registry, index, checkpoints) carry their own locking.
pub struct TurnEngine {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    cards: Arc<CardRegistry>,
    index: Arc<ToolIndex>,
    injection: InjectionScreen,
    domain: DomainClassifier,
    output: OutputScreen,
    response_policy: ResponsePolicy,
    checkpoints: Arc<dyn CheckpointStore>,
    config: EngineConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    InputGuardrail,
    QueryRewriter,
    Agent,
    Tools,
    OutputGuardrail,
}

impl TurnEngine {
    /// Creates an engine over the supplied collaborators.
    ///
    /// # Errors
    ///
    /// Returns a [`KernelError`] when a built-in guardrail pattern fails to
    /// compile.
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        cards: Arc<CardRegistry>,
        index: Arc<ToolIndex>,
        domain: DomainClassifier,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> KernelResult<Self> {
        let injection = InjectionScreen::new()?;
        let output = OutputScreen::new()?;
        let response_policy = ResponsePolicy::new()?;

        Ok(Self {
            model,
            tools,
            cards,
            index,
            injection,
            domain,
            output,
            response_policy,
            checkpoints,
            config: EngineConfig::default(),
        })
    }

    /// Replaces the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the live tool registry.
    #[must_use]
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Returns the tool card registry.
    #[must_use]
    pub fn cards(&self) -> &Arc<CardRegistry> {
        &self.cards
    }

    /// Registers a tool (and optionally its card), then resynchronizes the
    /// retrieval index.
    ///
    /// A failed reindex is logged, not fatal: search degrades gracefully and
    /// the next reindex run repairs the corpus.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Tool`] on duplicate registration.
    pub async fn register_tool<T>(
        &self,
        metadata: ToolMetadata,
        card: Option<ToolCard>,
        tool: T,
    ) -> KernelResult<()>
    where
        T: Tool + 'static,
    {
        if let Some(card) = card {
            self.cards.insert(card);
        }
        self.tools.register(metadata, tool)?;
        if let Err(err) = self.reindex_tools().await {
            warn!(error = %err, "reindex after registration failed");
        }
        Ok(())
    }

    /// Unregisters a tool and removes its documents from the index so the
    /// change is visible to the very next search.
    ///
    /// # Errors
    ///
    /// Propagates index removal failures.
    pub async fn unregister_tool(&self, name: &str) -> KernelResult<bool> {
        let removed = self.tools.unregister(name);
        if removed {
            self.index.remove(name).await?;
        }
        Ok(removed)
    }

    /// Resynchronizes the retrieval index with the live tool set.
    ///
    /// # Errors
    ///
    /// Propagates embedding and store failures.
    pub async fn reindex_tools(&self) -> KernelResult<ReindexReport> {
        let specs: Vec<ToolSpec> = self
            .tools
            .snapshot()
            .iter()
            .map(|handle| ToolSpec::new(handle.metadata().name(), handle.metadata().description()))
            .collect();
        Ok(self.index.reindex(&specs).await?)
    }

    /// Runs one full turn: load state, drive the node graph, persist state.
    ///
    /// Policy violations are handled in-band. Any unrecovered pipeline error
    /// is mapped to a fixed apologetic answer; the diagnostic lands in the
    /// trace, never in the visible text.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Checkpoint`] when state cannot be loaded or
    /// persisted.
    pub async fn run_turn(&self, session: &SessionId, user_text: &str) -> KernelResult<TurnOutcome> {
        let mut state = self
            .checkpoints
            .load(session)
            .await?
            .unwrap_or_default();
        state.begin_turn(user_text);

        if let Err(err) = self.drive(&mut state).await {
            warn!(session = %session, error = %err, "turn failed, sending fallback");
            let mut entry = TraceEntry::new("engine");
            entry.action = Some("error".into());
            entry.reason = Some(err.to_string());
            state.apply(StateUpdate {
                messages: vec![ChatMessage::assistant(FALLBACK_RESPONSE)],
                trace: vec![entry],
                guardrail_action: Some(GuardrailAction::Block),
                ..StateUpdate::default()
            });
        }

        self.checkpoints.save(session, &state).await?;

        let answer = state
            .messages
            .iter()
            .rev()
            .find(|message| message.role() == MessageRole::Assistant)
            .map(|message| message.content().to_owned())
            .unwrap_or_else(|| FALLBACK_RESPONSE.to_owned());

        info!(
            session = %session,
            action = ?state.guardrail_action,
            nodes = state.trace.len(),
            "turn complete"
        );

        Ok(TurnOutcome {
            answer,
            tools_used: state.tools_used(),
            trace: state.trace.clone(),
        })
    }

    async fn drive(&self, state: &mut TurnState) -> KernelResult<()> {
        let mut node = Node::InputGuardrail;
        let mut executed = 0usize;

        loop {
            executed += 1;
            if executed > self.config.recursion_limit {
                return Err(KernelError::RecursionLimit {
                    limit: self.config.recursion_limit,
                });
            }

            match node {
                Node::InputGuardrail => {
                    let update = self.input_guardrail(state).await;
                    state.apply(update);
                    if state.guardrail_action == GuardrailAction::Block {
                        return Ok(());
                    }
                    node = Node::QueryRewriter;
                }
                Node::QueryRewriter => {
                    let update = self.query_rewriter(state).await;
                    state.apply(update);
                    node = Node::Agent;
                }
                Node::Agent => {
                    let update = self.agent_step(state).await?;
                    state.apply(update);
                    node = if state.last_message().is_some_and(ChatMessage::has_tool_calls) {
                        Node::Tools
                    } else {
                        Node::OutputGuardrail
                    };
                }
                Node::Tools => {
                    let update = self.tools_step(state).await;
                    state.apply(update);
                    node = Node::Agent;
                }
                Node::OutputGuardrail => {
                    let update = self.output_guardrail(state).await;
                    state.apply(update);
                    if state.guardrail_action == GuardrailAction::Retry {
                        node = Node::Agent;
                    } else {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Validates the user utterance before it can reach the model.
    ///
    /// Injection screening always runs. Domain classification is skipped for
    /// follow-ups: but only after a guardrail-*passed* response exists in
    /// the session, so a blocked first turn cannot whitelist the second.
    async fn input_guardrail(&self, state: &TurnState) -> StateUpdate {
        let started = Instant::now();
        let query = state.last_human_query();
        let is_followup = state.conversation_started;

        let mut verdict = self.injection.check(&query);
        if verdict.is_pass() && !is_followup {
            verdict = self.domain.classify(&query).await;
        }

        let mut entry = TraceEntry::new("input_guardrail");
        entry.duration_ms = elapsed_ms(started);
        entry.is_followup = Some(is_followup);

        if verdict.is_pass() {
            entry.action = Some("pass".into());
            return StateUpdate {
                guardrail_action: Some(GuardrailAction::Pass),
                trace: vec![entry],
                ..StateUpdate::default()
            };
        }

        let preview: String = query.chars().take(80).collect();
        warn!(reason = verdict.reason(), query = %preview, "input blocked");
        entry.action = Some("block".into());
        entry.reason = Some(verdict.reason().to_owned());
        StateUpdate {
            messages: vec![ChatMessage::assistant(verdict.reason())],
            guardrail_action: Some(GuardrailAction::Block),
            trace: vec![entry],
            ..StateUpdate::default()
        }
    }

    /// Rewrites short, context-dependent follow-ups into standalone
    /// questions for retrieval. The original utterance stays verbatim in
    /// history; only `rewritten_query` carries the result.
    async fn query_rewriter(&self, state: &TurnState) -> StateUpdate {
        let started = Instant::now();
        let query = state.last_human_query();
        let stripped = query.trim().to_owned();

        let prior: Vec<ChatMessage> = state.messages[..state.messages.len().saturating_sub(1)]
            .iter()
            .filter(|message| {
                matches!(message.role(), MessageRole::Human | MessageRole::Assistant)
            })
            .cloned()
            .collect();

        let mut entry = TraceEntry::new("query_rewriter");

        if stripped.chars().count() >= self.config.rewrite_char_threshold || prior.is_empty() {
            entry.duration_ms = elapsed_ms(started);
            entry.action = Some("skip".into());
            entry.reason = Some("long query or no history".into());
            return StateUpdate {
                trace: vec![entry],
                ..StateUpdate::default()
            };
        }

        if stripped.chars().count() <= 1 && !MEANINGFUL_SINGLES.contains(&stripped.as_str()) {
            info!(input = %stripped, "too short to rewrite, treating as meaningless");
            entry.duration_ms = elapsed_ms(started);
            entry.action = Some("skip".into());
            entry.reason = Some(format!("too_short ({} chars)", stripped.chars().count()));
            return StateUpdate {
                rewritten_query: Some(stripped),
                trace: vec![entry],
                ..StateUpdate::default()
            };
        }

        // Last two turns of context.
        let context: Vec<ChatMessage> = prior.iter().rev().take(4).rev().cloned().collect();
        let mut prompt = context;
        prompt.push(ChatMessage::human(format!(
            "위 대화를 참고하여 이 후속 질문을 완전한 독립 질문으로 재작성: 「{query}」"
        )));

        let request = match InferenceRequest::new(prompt) {
            Ok(request) => request.with_system_prompt(REWRITE_SYSTEM_PROMPT),
            Err(err) => {
                warn!(error = %err, "rewrite prompt construction failed");
                entry.duration_ms = elapsed_ms(started);
                entry.action = Some("skip".into());
                entry.reason = Some("rewrite not needed or failed".into());
                return StateUpdate {
                    trace: vec![entry],
                    ..StateUpdate::default()
                };
            }
        };

        match invoke_with_retry(self.model.as_ref(), request, &self.config.model_retry).await {
            Ok(response) => {
                let rewritten = response
                    .content()
                    .trim()
                    .trim_matches(['"', '\'', '「', '」'])
                    .to_owned();
                if !rewritten.is_empty() && rewritten != query {
                    info!(original = %query, rewritten = %rewritten, "query rewritten");
                    entry.duration_ms = elapsed_ms(started);
                    entry.action = Some("rewrite".into());
                    entry.original = Some(query);
                    entry.rewritten = Some(rewritten.clone());
                    return StateUpdate {
                        rewritten_query: Some(rewritten),
                        trace: vec![entry],
                        ..StateUpdate::default()
                    };
                }
            }
            Err(err) => warn!(error = %err, "query rewrite failed"),
        }

        entry.duration_ms = elapsed_ms(started);
        entry.action = Some("skip".into());
        entry.reason = Some("rewrite not needed or failed".into());
        StateUpdate {
            trace: vec![entry],
            ..StateUpdate::default()
        }
    }

    /// One agent step: bind the retrieval-filtered tool set, call the model
    /// with bounded retry, repair malformed output.
    async fn agent_step(&self, state: &TurnState) -> KernelResult<StateUpdate> {
        let started = Instant::now();
        let snapshot = self.tools.snapshot();
        let relevant = self.select_relevant_tools(state, &snapshot).await;
        let schemas: Vec<ToolSchema> = relevant.iter().map(|h| self.schema_for(h)).collect();
        let tools_bound = schemas.len();

        let history = trim_to_recent_turns(&state.messages, self.config.max_conversation_turns);
        let history = sanitize_history(history);

        let request = InferenceRequest::new(history)?
            .with_system_prompt(self.config.system_prompt.clone())
            .with_tools(schemas)
            .with_temperature(self.config.temperature)
            .with_max_output_tokens(self.config.max_output_tokens);

        let response =
            invoke_with_retry(self.model.as_ref(), request, &self.config.model_retry).await?;

        let response = match sanitize_response(response) {
            SanitizedResponse::Clean(message) | SanitizedResponse::Repaired(message) => message,
            // An emptied message still flows to the output guardrail, whose
            // empty-response check drives the retry path.
            SanitizedResponse::Dropped => ChatMessage::assistant(""),
        };

        let mut entry = TraceEntry::new("agent");
        entry.duration_ms = elapsed_ms(started);
        entry.tools_bound = Some(tools_bound);

        Ok(StateUpdate {
            messages: vec![response],
            trace: vec![entry],
            ..StateUpdate::default()
        })
    }

    /// Filters the registry snapshot down to retrieval candidates for the
    /// effective query. Search failures and empty candidate sets degrade to
    /// the full tool set: availability beats selection accuracy.
    async fn select_relevant_tools(
        &self,
        state: &TurnState,
        snapshot: &[ToolHandle],
    ) -> Vec<ToolHandle> {
        let query = state
            .rewritten_query
            .clone()
            .filter(|rewritten| !rewritten.is_empty())
            .unwrap_or_else(|| state.last_human_query());
        if query.is_empty() {
            return snapshot.to_vec();
        }

        match self.index.search(&query, self.config.top_k).await {
            Ok(candidates) if !candidates.is_empty() => {
                let names: HashSet<&str> =
                    candidates.iter().map(|candidate| candidate.name()).collect();
                let filtered: Vec<ToolHandle> = snapshot
                    .iter()
                    .filter(|handle| names.contains(handle.metadata().name()))
                    .cloned()
                    .collect();
                if filtered.is_empty() {
                    snapshot.to_vec()
                } else {
                    filtered
                }
            }
            Ok(_) => snapshot.to_vec(),
            Err(err) => {
                debug!(error = %err, "tool search unavailable, using all tools");
                snapshot.to_vec()
            }
        }
    }

    fn schema_for(&self, handle: &ToolHandle) -> ToolSchema {
        let metadata = handle.metadata();
        let description = match self
            .cards
            .get(metadata.name())
            .and_then(|card| card.disambiguation_text())
        {
            Some(disambiguation) => format!("{}\n\n{disambiguation}", metadata.description()),
            None => metadata.description().to_owned(),
        };
        ToolSchema::new(metadata.name(), description, metadata.parameters().clone())
    }

    /// Executes every requested tool call against the *current* registry.
    /// Unknown tools and execution failures become error-result messages; a
    /// single failing tool never aborts the turn.
    async fn tools_step(&self, state: &TurnState) -> StateUpdate {
        let Some(last) = state.last_message() else {
            return StateUpdate::default();
        };
        let calls = last.tool_calls().to_vec();

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let Some(handle) = self.tools.get(&call.name) else {
                warn!(tool = %call.name, "requested tool not in registry");
                results.push(ChatMessage::tool_result(
                    call.id,
                    call.name.clone(),
                    format!("Error: tool '{}' not found in registry", call.name),
                ));
                continue;
            };

            match handle.invoke(call.arguments.clone()).await {
                Ok(output) => {
                    let content = serde_json::to_string(&output).unwrap_or_default();
                    results.push(ChatMessage::tool_result(call.id, call.name, content));
                }
                Err(err) => {
                    warn!(tool = %call.name, error = %err, "tool execution failed");
                    results.push(ChatMessage::tool_result(
                        call.id,
                        call.name.clone(),
                        format!("Error executing tool '{}': {err}", call.name),
                    ));
                }
            }
        }

        StateUpdate {
            messages: results,
            ..StateUpdate::default()
        }
    }

    /// Validates the generated response and applies the retry policy.
    ///
    /// First failure within the budget: inject a policy hint and route back
    /// to the agent. Budget exhausted: replace the response with the fixed
    /// safe fallback and block, guaranteeing termination. On pass: scrub
    /// internal tokens, inject at most one disclaimer, and mark the
    /// conversation started.
    async fn output_guardrail(&self, state: &TurnState) -> StateUpdate {
        let started = Instant::now();
        let last = state.last_message();
        let text = last.map(ChatMessage::content).unwrap_or_default().to_owned();
        let retry_count = state.guardrail_retry_count;

        let verdict = self.output.check(&text);
        let mut entry = TraceEntry::new("output_guardrail");

        if !verdict.is_pass() {
            let preview: String = text.chars().take(120).collect();
            warn!(
                retry = retry_count,
                reason = verdict.reason(),
                text = %preview,
                "output blocked"
            );

            if retry_count < self.config.max_output_retries {
                let hint = ChatMessage::system(format!(
                    "[출력 검증 실패] 직전 응답이 다음 이유로 차단되었습니다: {}\n\
                     위반 표현을 사용하지 않고 같은 내용을 다시 답변해 주세요.",
                    verdict.reason()
                ));
                entry.duration_ms = elapsed_ms(started);
                entry.action = Some("retry".into());
                entry.reason = Some(verdict.reason().to_owned());
                entry.retry_count = Some(retry_count + 1);
                return StateUpdate {
                    messages: vec![hint],
                    guardrail_action: Some(GuardrailAction::Retry),
                    guardrail_retry_count: Some(retry_count + 1),
                    trace: vec![entry],
                    ..StateUpdate::default()
                };
            }

            entry.duration_ms = elapsed_ms(started);
            entry.action = Some("block".into());
            entry.reason = Some(verdict.reason().to_owned());
            entry.retry_count = Some(retry_count);
            let replacement = match last {
                Some(message) => ChatMessage::assistant(SAFE_RESPONSE).with_id(message.id()),
                None => ChatMessage::assistant(SAFE_RESPONSE),
            };
            return StateUpdate {
                messages: vec![replacement],
                guardrail_action: Some(GuardrailAction::Block),
                trace: vec![entry],
                ..StateUpdate::default()
            };
        }

        let registered_names: Vec<String> = self
            .tools
            .snapshot()
            .iter()
            .map(|handle| handle.metadata().name().to_owned())
            .collect();
        let tools_used = state.tools_used();
        let finalized = self
            .response_policy
            .finalize(&text, &registered_names, &tools_used);

        entry.duration_ms = elapsed_ms(started);
        entry.action = Some("pass".into());
        if finalized.disclaimer_appended {
            entry.disclaimer_appended = Some(true);
        }
        if finalized.internal_tokens_removed {
            entry.internal_tokens_removed = Some(true);
        }

        let messages = if finalized.text == text {
            Vec::new()
        } else {
            let amended = match last {
                Some(message) => ChatMessage::assistant(finalized.text).with_id(message.id()),
                None => ChatMessage::assistant(finalized.text),
            };
            vec![amended]
        };

        StateUpdate {
            messages,
            guardrail_action: Some(GuardrailAction::Pass),
            conversation_started: Some(true),
            trace: vec![entry],
            ..StateUpdate::default()
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
