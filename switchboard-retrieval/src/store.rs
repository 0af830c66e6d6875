//! Vector store contract and a local in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::embed::EmbeddingVector;
use crate::RetrievalResult;

/// Document stored in a vector collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    id: String,
    text: String,
    embedding: EmbeddingVector,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl StoredDocument {
    /// Creates a document with the supplied id, raw text, and embedding.
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: EmbeddingVector) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding,
            metadata: Map::new(),
        }
    }

    /// Attaches a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the document identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the raw document text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the embedding.
    #[must_use]
    pub fn embedding(&self) -> &EmbeddingVector {
        &self.embedding
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

/// Conjunction of exact-match metadata conditions.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    conditions: Map<String, Value>,
}

impl MetadataFilter {
    /// Creates an empty filter matching every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the given field to equal the given value.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// Returns whether the supplied metadata satisfies every condition.
    #[must_use]
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Ranked match returned from a similarity query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMatch {
    id: String,
    /// Cosine distance; similarity = 1.0 − distance.
    distance: f32,
    text: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl StoreMatch {
    /// Creates a match record.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        distance: f32,
        text: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            distance,
            text: text.into(),
            metadata,
        }
    }

    /// Returns the document identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the cosine distance to the query.
    #[must_use]
    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Returns the matched document text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

/// Interface for vector store backends.
///
/// Distances are cosine distances in `[0, 2]`; queries return matches in
/// ascending distance order (nearest first).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or overwrites documents by id.
    async fn upsert(&self, documents: Vec<StoredDocument>) -> RetrievalResult<()>;

    /// Returns up to `n_results` nearest documents, optionally restricted by
    /// a metadata filter.
    async fn query(
        &self,
        embedding: &EmbeddingVector,
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> RetrievalResult<Vec<StoreMatch>>;

    /// Deletes documents by id; absent ids are ignored.
    async fn delete(&self, ids: &[String]) -> RetrievalResult<()>;

    /// Returns the ids of documents matching the filter (all ids when
    /// `None`).
    async fn ids(&self, filter: Option<&MetadataFilter>) -> RetrievalResult<Vec<String>>;

    /// Returns the number of stored documents.
    async fn count(&self) -> RetrievalResult<usize>;
}

/// In-memory vector store using exact cosine distance.
///
/// Suitable for tests, demos, and single-process deployments; production
/// deployments implement [`VectorStore`] against an external collection.
#[derive(Default)]
pub struct InMemoryVectorStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl InMemoryVectorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, documents: Vec<StoredDocument>) -> RetrievalResult<()> {
        let mut guard = self.documents.write().await;
        for document in documents {
            guard.insert(document.id().to_owned(), document);
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &EmbeddingVector,
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> RetrievalResult<Vec<StoreMatch>> {
        let guard = self.documents.read().await;
        let mut matches = Vec::new();

        for document in guard.values() {
            if let Some(filter) = filter
                && !filter.matches(document.metadata())
            {
                continue;
            }
            if document.embedding().len() != embedding.len() {
                continue;
            }

            let distance = 1.0 - document.embedding().cosine(embedding);
            matches.push(StoreMatch::new(
                document.id(),
                distance,
                document.text(),
                document.metadata().clone(),
            ));
        }

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(n_results);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> RetrievalResult<()> {
        let mut guard = self.documents.write().await;
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    async fn ids(&self, filter: Option<&MetadataFilter>) -> RetrievalResult<Vec<String>> {
        let guard = self.documents.read().await;
        Ok(guard
            .values()
            .filter(|doc| filter.is_none_or(|f| f.matches(doc.metadata())))
            .map(|doc| doc.id().to_owned())
            .collect())
    }

    async fn count(&self) -> RetrievalResult<usize> {
        let guard = self.documents.read().await;
        Ok(guard.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn doc(id: &str, values: Vec<f32>, doc_type: &str) -> StoredDocument {
        StoredDocument::new(id, format!("text for {id}"), EmbeddingVector::new(values).unwrap())
            .with_metadata("doc_type", json!(doc_type))
    }

    #[tokio::test]
    async fn nearest_first_ordering() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![
                doc("a", vec![1.0, 0.0], "tool"),
                doc("b", vec![0.0, 1.0], "tool"),
                doc("c", vec![0.7, 0.7], "tool"),
            ])
            .await
            .unwrap();

        let query = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        let matches = store.query(&query, 3, None).await.unwrap();
        let ids: Vec<_> = matches.iter().map(StoreMatch::id).collect();
        assert_eq!(ids, ["a", "c", "b"]);
        assert!(matches[0].distance() < matches[1].distance());
    }

    #[tokio::test]
    async fn filter_restricts_results_and_ids() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![
                doc("tool_a", vec![1.0, 0.0], "tool"),
                doc("__spec_version__", vec![0.9, 0.1], "version"),
            ])
            .await
            .unwrap();

        let filter = MetadataFilter::new().field("doc_type", "tool");
        let query = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();

        let matches = store.query(&query, 10, Some(&filter)).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id(), "tool_a");

        let ids = store.ids(Some(&filter)).await.unwrap();
        assert_eq!(ids, ["tool_a"]);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_overwrites_and_delete_removes() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![doc("a", vec![1.0, 0.0], "tool")])
            .await
            .unwrap();
        store
            .upsert(vec![doc("a", vec![0.0, 1.0], "tool")])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.delete(&["a".to_owned(), "missing".to_owned()]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn multi_field_filter_requires_all_conditions() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![doc("v", vec![1.0], "version")
                .with_metadata("spec_version", json!("abc"))])
            .await
            .unwrap();

        let hit = MetadataFilter::new()
            .field("doc_type", "version")
            .field("spec_version", "abc");
        let miss = MetadataFilter::new()
            .field("doc_type", "version")
            .field("spec_version", "def");

        assert_eq!(store.ids(Some(&hit)).await.unwrap().len(), 1);
        assert!(store.ids(Some(&miss)).await.unwrap().is_empty());
    }
}
