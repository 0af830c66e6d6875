//! Scripted multi-turn session through the full switchboard engine:
//! guardrails, tool routing, tool dispatch, and disclaimer injection.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::info;

use switchboard_adapters::{ChatMessage, ScriptedChatModel, ToolCallRequest};
use switchboard_guard::{DomainClassifier, DomainClassifierConfig};
use switchboard_kernel::{InMemoryCheckpointStore, TurnEngine};
use switchboard_primitives::SessionId;
use switchboard_retrieval::{
    InMemoryVectorStore, StaticEmbedder, ToolIndex, ToolIndexConfig,
};
use switchboard_tools::card::{CardRegistry, ToolCard};
use switchboard_tools::registry::{ToolMetadata, ToolRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("=== Switchboard: console demo ===");

    let engine = build_engine()?;
    register_sample_tools(&engine).await?;

    let session = SessionId::new("demo")?;

    for query in [
        // Out-of-domain: blocked at the input guardrail, model never called.
        // A blocked turn does not mark the conversation as started, so the
        // next utterance is still domain-classified.
        "주식 살 만한 종목 추천해줘",
        // Routed to premium_estimate, answer gets the premium disclaimer.
        "45세 여성 실버치아보험 보험료 알려줘",
        // Follow-up turn routed to claim_guide.
        "보험금 청구할 때 서류는 뭐가 필요해?",
    ] {
        info!("사용자: {query}");
        let outcome = engine.run_turn(&session, query).await?;
        info!("챗봇: {}", outcome.answer);
        if !outcome.tools_used.is_empty() {
            info!("사용 도구: {}", outcome.tools_used.join(", "));
        }
        for entry in &outcome.trace {
            info!(
                "  [{}] {}ms {}",
                entry.node,
                entry.duration_ms,
                entry.action.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}

fn build_engine() -> Result<TurnEngine> {
    // A scripted model stands in for the provider: first a premium lookup
    // turn (tool call + answer), then a claim-guide turn.
    let model = Arc::new(
        ScriptedChatModel::new("demo-model")
            .then_message(ChatMessage::assistant_with_calls(
                "",
                vec![ToolCallRequest::new(
                    "premium_estimate",
                    json!({ "age": 45, "gender": "F" }),
                )],
            ))
            .then_message(ChatMessage::assistant(
                "45세 여성 기준 실버치아보험 보험료는 월 약 32,000원입니다.",
            ))
            .then_message(ChatMessage::assistant_with_calls(
                "",
                vec![ToolCallRequest::new("claim_guide", json!({}))],
            ))
            .then_message(ChatMessage::assistant(
                "보험금 청구에는 청구서, 신분증 사본, 진단서가 필요합니다.",
            )),
    );

    // Deterministic embedder: exemplar-grade queries land on the matching
    // axis, so the domain classifier and tool routing behave like the real
    // asymmetric backend without network access.
    let embedder = Arc::new(
        StaticEmbedder::new(4)
            .with_passage("보험 상품과 보장 질문", vec![1.0, 0.0, 0.0, 0.0])
            .with_passage("보험과 무관한 질문", vec![0.0, 1.0, 0.0, 0.0])
            .with_query("45세 여성 실버치아보험 보험료 알려줘", vec![1.0, 0.0, 0.0, 0.0])
            .with_query("주식 살 만한 종목 추천해줘", vec![0.0, 1.0, 0.0, 0.0])
            .with_query("보험금 청구할 때 서류는 뭐가 필요해?", vec![1.0, 0.0, 0.0, 0.0]),
    );

    let domain = DomainClassifier::new(
        embedder.clone(),
        DomainClassifierConfig {
            in_domain: vec!["보험 상품과 보장 질문".into()],
            out_of_domain: vec!["보험과 무관한 질문".into()],
            ..DomainClassifierConfig::default()
        },
    );

    let cards = Arc::new(CardRegistry::new());
    let index = Arc::new(ToolIndex::new(
        Arc::new(InMemoryVectorStore::new()),
        embedder,
        cards.clone(),
        ToolIndexConfig::default(),
    ));

    let engine = TurnEngine::new(
        model,
        Arc::new(ToolRegistry::new()),
        cards,
        index,
        domain,
        Arc::new(InMemoryCheckpointStore::new()),
    )?;
    Ok(engine)
}

async fn register_sample_tools(engine: &TurnEngine) -> Result<()> {
    engine
        .register_tool(
            ToolMetadata::new("premium_estimate", "나이·성별 기준 예상 보험료를 계산한다")?
                .with_parameters(json!({
                    "type": "object",
                    "properties": {
                        "age": { "type": "integer" },
                        "gender": { "type": "string" }
                    },
                    "required": ["age", "gender"]
                })),
            Some(
                ToolCard::new("premium_estimate", "나이와 성별 기준 예상 보험료를 계산한다.")?
                    .with_examples(["보험료 얼마야?", "45세 여성 치아보험 보험료 알려줘"])
                    .with_counter_examples(["상품 목록이 궁금하다 → product_search 사용"])
                    .with_tags(["보험료", "계산"]),
            ),
            |input: Value| async move {
                let age = input.get("age").and_then(Value::as_i64).unwrap_or(40);
                Ok(json!({ "monthly_premium": 20_000 + age * 300, "currency": "KRW" }))
            },
        )
        .await?;

    engine
        .register_tool(
            ToolMetadata::new("claim_guide", "보험금 청구 절차와 필요 서류를 안내한다")?,
            Some(
                ToolCard::new("claim_guide", "보험금 청구 절차와 필요 서류를 안내한다.")?
                    .with_examples(["청구 방법 알려줘", "보험금 청구 서류 뭐 필요해?"])
                    .with_tags(["청구", "서류"]),
            ),
            |_input: Value| async move {
                Ok(json!({ "documents": ["청구서", "신분증 사본", "진단서"] }))
            },
        )
        .await?;

    Ok(())
}
