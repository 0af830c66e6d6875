//! Multi-document tool routing index.
//!
//! Each tool contributes one document per card facet: the purpose sentence,
//! every positive example, and the joined tag string. Queries over-fetch and
//! aggregate per tool with **max**, never mean: averaging would dilute a
//! tool whose single best exemplar is a near-exact match.
//!
//! Reindexing is upsert-first: new and changed documents are written before
//! any stale document is deleted, so a query arriving mid-reindex never sees
//! an empty or partially-drained collection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use switchboard_primitives::RetryPolicy;
use switchboard_tools::card::CardRegistry;

use crate::embed::{EmbedMode, Embedder};
use crate::store::{MetadataFilter, StoredDocument, VectorStore};
use crate::{RetrievalError, RetrievalResult};

/// Bump when the document derivation scheme changes; forces a reindex even
/// when card contents are unchanged.
const INDEX_SCHEMA_VERSION: &str = "mv1";

/// Reserved document carrying the corpus content hash.
const VERSION_MARKER_ID: &str = "__spec_version__";

/// The embeddable identity of one live tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    name: String,
    description: String,
}

impl ToolSpec {
    /// Creates a spec from a tool name and its runtime description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the runtime description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Tool scored as relevant to a query. Transient: recomputed per query.
#[derive(Clone, Debug)]
pub struct ToolCandidate {
    name: String,
    score: f32,
    matched_text: String,
}

impl ToolCandidate {
    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the aggregated similarity score (1.0 − cosine distance,
    /// rounded to four decimal places).
    #[must_use]
    pub fn score(&self) -> f32 {
        self.score
    }

    /// Returns the text of the best-scoring document for this tool.
    #[must_use]
    pub fn matched_text(&self) -> &str {
        &self.matched_text
    }
}

/// Tuning knobs for the routing index.
#[derive(Clone, Copy, Debug)]
pub struct ToolIndexConfig {
    /// Default number of candidates returned by [`ToolIndex::search`].
    pub top_k: usize,
    /// Over-fetch factor compensating for one tool owning several documents.
    pub fetch_multiplier: usize,
    /// Retry policy applied to transient store failures during search.
    pub retry: RetryPolicy,
}

impl Default for ToolIndexConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            fetch_multiplier: 5,
            retry: RetryPolicy::store(),
        }
    }
}

/// Outcome of a reindex run.
#[derive(Clone, Debug)]
pub struct ReindexReport {
    /// Whether documents were written (false when the corpus was unchanged
    /// or empty).
    pub reindexed: bool,
    /// Number of tool documents written.
    pub documents: usize,
    /// Corpus content hash for this run.
    pub version: String,
}

/// Vector index routing queries to relevant tools.
pub struct ToolIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    cards: Arc<CardRegistry>,
    config: ToolIndexConfig,
    // Serializes reindex/remove; readers go straight to the store.
    write_lock: Mutex<()>,
}

impl ToolIndex {
    /// Creates an index over the supplied store, embedder, and card registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        cards: Arc<CardRegistry>,
        config: ToolIndexConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            cards,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the configured default `top_k`.
    #[must_use]
    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    /// Synchronizes the index with the supplied live tool set.
    ///
    /// No-op when the corpus content hash matches the stored version marker.
    /// Otherwise every derived document is upserted *before* the stale set
    /// (previous tool documents minus the new id set) is deleted, and the
    /// version marker is overwritten last. Runs under the index's single
    /// writer lock; concurrent searches observe either the pre- or
    /// post-reindex corpus, never an empty window.
    ///
    /// # Errors
    ///
    /// Propagates embedding and store failures; a failed run leaves the
    /// version marker stale so the next run starts over.
    pub async fn reindex(&self, tools: &[ToolSpec]) -> RetrievalResult<ReindexReport> {
        if tools.is_empty() {
            warn!("no tools to index, skipping");
            return Ok(ReindexReport {
                reindexed: false,
                documents: 0,
                version: String::new(),
            });
        }

        let _guard = self.write_lock.lock().await;

        let version = self.corpus_hash(tools);
        let marker_filter = MetadataFilter::new()
            .field("doc_type", "version")
            .field("spec_version", version.clone());
        match self.store.ids(Some(&marker_filter)).await {
            Ok(ids) if !ids.is_empty() => {
                info!(version, "tool corpus unchanged, skipping reindex");
                return Ok(ReindexReport {
                    reindexed: false,
                    documents: 0,
                    version,
                });
            }
            Ok(_) => {}
            // A failed marker lookup is not fatal: reindexing from scratch
            // is always safe, only wasteful.
            Err(err) => warn!(error = %err, "version marker lookup failed, reindexing"),
        }

        let missing = self
            .cards
            .missing_for(tools.iter().map(ToolSpec::name));
        if !missing.is_empty() {
            warn!(
                count = missing.len(),
                tools = ?missing,
                "tools without cards indexed from their descriptions"
            );
        }

        let derived: Vec<DerivedDocument> = tools.iter().flat_map(|t| self.derive(t)).collect();
        let mut texts: Vec<String> = derived.iter().map(|d| d.text.clone()).collect();
        let marker_text = format!("version:{version}");
        texts.push(marker_text.clone());

        let mut embeddings = self.embedder.embed(&texts, EmbedMode::Passage).await?;
        if embeddings.len() != texts.len() {
            return Err(RetrievalError::embedding(format!(
                "embedder returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        let marker_embedding = embeddings
            .pop()
            .ok_or_else(|| RetrievalError::embedding("embedder returned no vectors"))?;

        let new_ids: HashSet<String> = derived.iter().map(|d| d.id.clone()).collect();
        let documents: Vec<StoredDocument> = derived
            .into_iter()
            .zip(embeddings)
            .map(|(doc, embedding)| {
                StoredDocument::new(doc.id, doc.text, embedding)
                    .with_metadata("tool_name", json!(doc.tool_name))
                    .with_metadata("doc_type", json!("tool"))
                    .with_metadata("kind", json!(doc.kind))
                    .with_metadata("has_card", json!(doc.has_card))
            })
            .collect();
        let written = documents.len();

        // Upsert first: the collection is never empty mid-reindex.
        self.store.upsert(documents).await?;

        let tool_filter = MetadataFilter::new().field("doc_type", "tool");
        let existing = self.store.ids(Some(&tool_filter)).await?;
        let stale: Vec<String> = existing
            .into_iter()
            .filter(|id| !new_ids.contains(id))
            .collect();
        if !stale.is_empty() {
            self.store.delete(&stale).await?;
            info!(count = stale.len(), "cleaned stale tool documents");
        }

        let marker = StoredDocument::new(VERSION_MARKER_ID, marker_text, marker_embedding)
            .with_metadata("doc_type", json!("version"))
            .with_metadata("spec_version", json!(version.clone()));
        self.store.upsert(vec![marker]).await?;

        info!(
            tools = tools.len(),
            documents = written,
            version,
            "tool corpus indexed"
        );
        Ok(ReindexReport {
            reindexed: true,
            documents: written,
            version,
        })
    }

    /// Returns the top-k tools relevant to the query text, score-descending.
    ///
    /// Per-tool scores aggregate with max across that tool's matched
    /// documents. An empty index yields an empty result. Transient store
    /// failures are retried with bounded backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted; callers degrade to
    /// the full unfiltered tool set rather than failing the turn.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> RetrievalResult<Vec<ToolCandidate>> {
        let k = top_k.unwrap_or(self.config.top_k).max(1);
        self.config
            .retry
            .run("tool_search", RetrievalError::is_transient, || {
                self.search_once(query, k)
            })
            .await
    }

    async fn search_once(&self, query: &str, k: usize) -> RetrievalResult<Vec<ToolCandidate>> {
        let count = self.store.count().await?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_owned()], EmbedMode::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::embedding("embedder returned no query vector"))?;

        let fetch_n = (k * self.config.fetch_multiplier).min(count);
        let tool_filter = MetadataFilter::new().field("doc_type", "tool");
        let matches = self
            .store
            .query(&query_embedding, fetch_n, Some(&tool_filter))
            .await?;

        let mut best: HashMap<String, (f32, String)> = HashMap::new();
        for hit in &matches {
            let score = round4(1.0 - hit.distance());
            let tool_name = hit
                .metadata()
                .get("tool_name")
                .and_then(|v| v.as_str())
                .map_or_else(|| tool_name_from_doc_id(hit.id()), ToOwned::to_owned);

            let entry = best.entry(tool_name).or_insert((f32::MIN, String::new()));
            if score > entry.0 {
                *entry = (score, hit.text().to_owned());
            }
        }

        let mut candidates: Vec<ToolCandidate> = best
            .into_iter()
            .map(|(name, (score, matched_text))| ToolCandidate {
                name,
                score,
                matched_text,
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        candidates.truncate(k);

        debug!(query = %query, candidates = candidates.len(), "tool search complete");
        Ok(candidates)
    }

    /// Deletes every document belonging to the named tool, effective for the
    /// next search. Used for live deregistration, independently of the batch
    /// reindex path.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn remove(&self, tool_name: &str) -> RetrievalResult<usize> {
        let _guard = self.write_lock.lock().await;

        let tool_filter = MetadataFilter::new().field("doc_type", "tool");
        let existing = self.store.ids(Some(&tool_filter)).await?;

        let primary = format!("tool_{tool_name}");
        let prefix = format!("tool_{tool_name}__");
        let to_delete: Vec<String> = existing
            .into_iter()
            .filter(|id| *id == primary || id.starts_with(&prefix))
            .collect();

        if to_delete.is_empty() {
            return Ok(0);
        }
        let removed = to_delete.len();
        self.store.delete(&to_delete).await?;
        info!(count = removed, tool = tool_name, "removed tool documents");
        Ok(removed)
    }

    /// Detects card, example, and schema changes across the whole corpus.
    fn corpus_hash(&self, tools: &[ToolSpec]) -> String {
        let mut sorted: Vec<&ToolSpec> = tools.iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));

        let body = sorted
            .iter()
            .map(|tool| {
                let embed_text = self
                    .cards
                    .get(tool.name())
                    .map_or_else(|| tool.description().to_owned(), |card| card.embed_text());
                format!("{}:{embed_text}", tool.name())
            })
            .collect::<Vec<_>>()
            .join("|");

        let digest = Sha256::digest(format!("schema:{INDEX_SCHEMA_VERSION}|{body}").as_bytes());
        digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>()[..16]
            .to_owned()
    }

    fn derive(&self, tool: &ToolSpec) -> Vec<DerivedDocument> {
        let Some(card) = self.cards.get(tool.name()) else {
            return vec![DerivedDocument {
                id: format!("tool_{}", tool.name()),
                text: tool.description().to_owned(),
                kind: "purpose",
                tool_name: tool.name().to_owned(),
                has_card: false,
            }];
        };

        let mut docs = vec![DerivedDocument {
            id: format!("tool_{}", tool.name()),
            text: card.purpose().to_owned(),
            kind: "purpose",
            tool_name: tool.name().to_owned(),
            has_card: true,
        }];
        for (i, example) in card.when_to_use().iter().enumerate() {
            docs.push(DerivedDocument {
                id: format!("tool_{}__use_{i}", tool.name()),
                text: example.clone(),
                kind: "example",
                tool_name: tool.name().to_owned(),
                has_card: true,
            });
        }
        if !card.tags().is_empty() {
            docs.push(DerivedDocument {
                id: format!("tool_{}__tags", tool.name()),
                text: card.tags().join(" "),
                kind: "tags",
                tool_name: tool.name().to_owned(),
                has_card: true,
            });
        }
        docs
    }
}

struct DerivedDocument {
    id: String,
    text: String,
    kind: &'static str,
    tool_name: String,
    has_card: bool,
}

fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

fn tool_name_from_doc_id(doc_id: &str) -> String {
    let base = doc_id.split("__").next().unwrap_or(doc_id);
    base.strip_prefix("tool_").unwrap_or(base).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::embed::{EmbeddingVector, StaticEmbedder};
    use crate::store::{InMemoryVectorStore, StoreMatch};
    use switchboard_tools::card::ToolCard;

    /// Store wrapper that records the order of mutating operations.
    struct RecordingStore {
        inner: InMemoryVectorStore,
        ops: StdMutex<Vec<String>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryVectorStore::new(),
                ops: StdMutex::new(Vec::new()),
            }
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }

        fn clear_ops(&self) {
            self.ops.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn upsert(&self, documents: Vec<StoredDocument>) -> RetrievalResult<()> {
            let kinds: HashSet<&str> = documents
                .iter()
                .filter_map(|d| d.metadata().get("doc_type").and_then(|v| v.as_str()))
                .collect();
            let label = if kinds.contains("version") {
                "upsert_version"
            } else {
                "upsert_tools"
            };
            self.ops
                .lock()
                .unwrap()
                .push(format!("{label}:{}", documents.len()));
            self.inner.upsert(documents).await
        }

        async fn query(
            &self,
            embedding: &EmbeddingVector,
            n_results: usize,
            filter: Option<&MetadataFilter>,
        ) -> RetrievalResult<Vec<StoreMatch>> {
            self.inner.query(embedding, n_results, filter).await
        }

        async fn delete(&self, ids: &[String]) -> RetrievalResult<()> {
            self.ops.lock().unwrap().push(format!("delete:{}", ids.len()));
            self.inner.delete(ids).await
        }

        async fn ids(&self, filter: Option<&MetadataFilter>) -> RetrievalResult<Vec<String>> {
            self.inner.ids(filter).await
        }

        async fn count(&self) -> RetrievalResult<usize> {
            self.inner.count().await
        }
    }

    fn cards_with(entries: &[ToolCard]) -> Arc<CardRegistry> {
        let cards = CardRegistry::new();
        for card in entries {
            cards.insert(card.clone());
        }
        Arc::new(cards)
    }

    fn index_over(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        cards: Arc<CardRegistry>,
    ) -> ToolIndex {
        ToolIndex::new(store, embedder, cards, ToolIndexConfig::default())
    }

    fn product_card() -> ToolCard {
        ToolCard::new("product_search", "판매 중인 보험 상품 목록을 검색한다.")
            .unwrap()
            .with_examples(["우리 회사 상품 뭐 있어?", "치아보험 있어?"])
            .with_tags(["상품조회", "목록"])
    }

    fn claim_card() -> ToolCard {
        ToolCard::new("claim_guide", "보험금 청구 절차를 안내한다.")
            .unwrap()
            .with_examples(["청구 방법 알려줘"])
    }

    #[tokio::test]
    async fn second_reindex_with_unchanged_corpus_writes_nothing() {
        let store = Arc::new(RecordingStore::new());
        let embedder = Arc::new(StaticEmbedder::new(8));
        let index = index_over(store.clone(), embedder, cards_with(&[product_card()]));

        let tools = vec![ToolSpec::new("product_search", "상품 검색 도구")];
        let first = index.reindex(&tools).await.unwrap();
        assert!(first.reindexed);
        assert_eq!(first.documents, 4); // purpose + 2 examples + tags

        store.clear_ops();
        let second = index.reindex(&tools).await.unwrap();
        assert!(!second.reindexed);
        assert_eq!(second.version, first.version);
        assert!(store.ops().is_empty(), "unchanged corpus must write nothing");
    }

    #[tokio::test]
    async fn reindex_upserts_before_deleting_stale_documents() {
        let store = Arc::new(RecordingStore::new());
        let embedder = Arc::new(StaticEmbedder::new(8));
        let cards = cards_with(&[product_card(), claim_card()]);
        let index = index_over(store.clone(), embedder, cards);

        index
            .reindex(&[
                ToolSpec::new("product_search", "상품 검색"),
                ToolSpec::new("claim_guide", "청구 안내"),
            ])
            .await
            .unwrap();

        store.clear_ops();
        index
            .reindex(&[ToolSpec::new("product_search", "상품 검색")])
            .await
            .unwrap();

        let ops = store.ops();
        assert_eq!(ops.len(), 3, "tool upsert, stale delete, marker upsert: {ops:?}");
        assert!(ops[0].starts_with("upsert_tools:"));
        assert_eq!(ops[1], "delete:2"); // claim_guide purpose + example
        assert!(ops[2].starts_with("upsert_version:"));

        // claim_guide is gone, product_search untouched.
        let remaining = store.ids(None).await.unwrap();
        assert!(remaining.iter().all(|id| !id.contains("claim_guide")));
        assert!(remaining.contains(&"tool_product_search".to_owned()));
    }

    #[tokio::test]
    async fn search_aggregates_per_tool_with_max_not_mean() {
        // Three documents for one tool scoring 0.2 / 0.9 / 0.5 against the query.
        let card = ToolCard::new("premium_estimate", "보험료를 계산한다.")
            .unwrap()
            .with_examples(["보험료 얼마야?", "월 납입액 알려줘"]);
        let embedder = Arc::new(
            StaticEmbedder::new(2)
                .with_query("예상 보험료", vec![1.0, 0.0])
                .with_passage("보험료를 계산한다.", vec![0.2, (1.0f32 - 0.04).sqrt()])
                .with_passage("보험료 얼마야?", vec![0.9, (1.0f32 - 0.81).sqrt()])
                .with_passage("월 납입액 알려줘", vec![0.5, (1.0f32 - 0.25).sqrt()]),
        );
        let store = Arc::new(InMemoryVectorStore::new());
        let index = index_over(store, embedder, cards_with(&[card]));

        index
            .reindex(&[ToolSpec::new("premium_estimate", "보험료 계산")])
            .await
            .unwrap();

        let candidates = index.search("예상 보험료", Some(3)).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name(), "premium_estimate");
        assert!(
            (candidates[0].score() - 0.9).abs() < 1e-3,
            "expected max aggregation 0.9, got {}",
            candidates[0].score()
        );
        assert_eq!(candidates[0].matched_text(), "보험료 얼마야?");
    }

    #[tokio::test]
    async fn empty_index_returns_empty_result() {
        let index = index_over(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(StaticEmbedder::new(4)),
            Arc::new(CardRegistry::new()),
        );
        let candidates = index.search("아무 질문", None).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn cardless_tool_indexes_its_description() {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(StaticEmbedder::new(8));
        let index = index_over(store.clone(), embedder, Arc::new(CardRegistry::new()));

        index
            .reindex(&[ToolSpec::new("customer_search", "고객 계약 정보를 조회한다")])
            .await
            .unwrap();

        let ids = store.ids(None).await.unwrap();
        assert!(ids.contains(&"tool_customer_search".to_owned()));

        // The description itself is the only matchable document.
        let candidates = index
            .search("고객 계약 정보를 조회한다", None)
            .await
            .unwrap();
        assert_eq!(candidates[0].name(), "customer_search");
    }

    #[tokio::test]
    async fn remove_deletes_only_the_named_tools_documents() {
        let alpha = ToolCard::new("rider_list", "특약 목록을 조회한다.")
            .unwrap()
            .with_examples(["특약 목록 보여줘"]);
        let near_miss = ToolCard::new("rider_list_all", "전체 특약을 나열한다.").unwrap();
        let store = Arc::new(InMemoryVectorStore::new());
        let index = index_over(
            store.clone(),
            Arc::new(StaticEmbedder::new(8)),
            cards_with(&[alpha, near_miss]),
        );

        index
            .reindex(&[
                ToolSpec::new("rider_list", "특약 목록"),
                ToolSpec::new("rider_list_all", "전체 특약"),
            ])
            .await
            .unwrap();

        let removed = index.remove("rider_list").await.unwrap();
        assert_eq!(removed, 2); // purpose + one example

        let ids = store.ids(None).await.unwrap();
        assert!(!ids.contains(&"tool_rider_list".to_owned()));
        assert!(!ids.iter().any(|id| id.starts_with("tool_rider_list__")));
        assert!(ids.contains(&"tool_rider_list_all".to_owned()));

        assert_eq!(index.remove("rider_list").await.unwrap(), 0);
    }

    /// Store that fails the first `failures` calls with a connection error.
    struct FlakyStore {
        inner: InMemoryVectorStore,
        remaining_failures: StdMutex<u32>,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: InMemoryVectorStore::new(),
                remaining_failures: StdMutex::new(failures),
            }
        }

        fn trip(&self) -> RetrievalResult<()> {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RetrievalError::Connection {
                    reason: "connection reset".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn upsert(&self, documents: Vec<StoredDocument>) -> RetrievalResult<()> {
            self.inner.upsert(documents).await
        }

        async fn query(
            &self,
            embedding: &EmbeddingVector,
            n_results: usize,
            filter: Option<&MetadataFilter>,
        ) -> RetrievalResult<Vec<StoreMatch>> {
            self.trip()?;
            self.inner.query(embedding, n_results, filter).await
        }

        async fn delete(&self, ids: &[String]) -> RetrievalResult<()> {
            self.inner.delete(ids).await
        }

        async fn ids(&self, filter: Option<&MetadataFilter>) -> RetrievalResult<Vec<String>> {
            self.inner.ids(filter).await
        }

        async fn count(&self) -> RetrievalResult<usize> {
            self.trip()?;
            self.inner.count().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_store_failure_is_retried() {
        let store = Arc::new(FlakyStore::new(1));
        let index = index_over(
            store,
            Arc::new(StaticEmbedder::new(8)),
            cards_with(&[claim_card()]),
        );
        index
            .reindex(&[ToolSpec::new("claim_guide", "청구 안내")])
            .await
            .unwrap();

        let candidates = index.search("청구 방법 알려줘", None).await.unwrap();
        assert_eq!(candidates[0].name(), "claim_guide");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_the_error() {
        let store = Arc::new(FlakyStore::new(10));
        let index = index_over(
            store,
            Arc::new(StaticEmbedder::new(8)),
            Arc::new(CardRegistry::new()),
        );

        let err = index
            .search("청구 방법", None)
            .await
            .expect_err("store stays down");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn corpus_hash_tracks_card_edits_and_tool_order() {
        let cards = cards_with(&[product_card()]);
        let index = index_over(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(StaticEmbedder::new(4)),
            cards.clone(),
        );

        let a = vec![
            ToolSpec::new("product_search", "상품 검색"),
            ToolSpec::new("claim_guide", "청구 안내"),
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        let before = index.corpus_hash(&a);
        assert_eq!(before, index.corpus_hash(&b), "order-insensitive");

        cards.insert(
            ToolCard::new("product_search", "판매 중인 보험 상품 목록을 검색한다.")
                .unwrap()
                .with_examples(["우리 회사 상품 뭐 있어?", "치아보험 있어?", "새 예시"])
                .with_tags(["상품조회", "목록"]),
        );
        assert_ne!(before, index.corpus_hash(&a), "card edits must change the hash");
    }
}
