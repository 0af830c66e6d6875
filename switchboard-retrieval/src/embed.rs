//! Embedding vectors and the text-embedding backend contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{RetrievalError, RetrievalResult};

/// Which side of an asymmetric embedding model a text belongs to.
///
/// Asymmetric backends (e.g. e5-family models) encode stored documents with
/// a `passage:` prefix and live queries with a `query:` prefix, which widens
/// the similarity margin between matching and non-matching pairs. Symmetric
/// backends ignore the mode.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    /// The text is a live query.
    Query,
    /// The text is a stored document or exemplar.
    Passage,
}

/// Immutable, validated floating-point embedding.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates an embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::InvalidVector`] when the vector is empty or
    /// contains non-finite values.
    pub fn new(values: Vec<f32>) -> RetrievalResult<Self> {
        if values.is_empty() {
            return Err(RetrievalError::InvalidVector(
                "embedding vector must not be empty",
            ));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(RetrievalError::InvalidVector(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the embedding is empty. Construction rejects empty
    /// inputs, so this only exists for API completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity with another embedding.
    ///
    /// Returns 0.0 when either vector has zero magnitude or the dimensions
    /// differ.
    #[must_use]
    pub fn cosine(&self, other: &Self) -> f32 {
        if self.len() != other.len() {
            return 0.0;
        }
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        let denom = self.magnitude() * other.magnitude();
        if denom == 0.0 { 0.0 } else { dot / denom }
    }

    fn magnitude(&self) -> f32 {
        self.values
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt()
    }
}

impl std::fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.values.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Self::new(values).map_err(serde::de::Error::custom)
    }
}

/// Text-embedding backend contract.
///
/// Implementations return one vector per input text, in order. The core
/// passes the [`EmbedMode`] so asymmetric backends can apply their prefix
/// convention; the vectors are expected to be comparable via cosine
/// similarity regardless of backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds the supplied texts under the given convention.
    async fn embed(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> RetrievalResult<Vec<EmbeddingVector>>;
}

/// Deterministic in-process embedder for tests, demos, and offline runs.
///
/// Known texts resolve through a fixture table keyed by `(mode, text)`, so a
/// test can pin exact similarity scores and emulate asymmetric conventions.
/// Unknown texts fall back to a mode-independent hashed unit vector, which
/// keeps the embedder total: it never fails and identical texts always map
/// to identical vectors.
#[derive(Debug)]
pub struct StaticEmbedder {
    dimensions: usize,
    entries: HashMap<(EmbedMode, String), EmbeddingVector>,
}

impl StaticEmbedder {
    /// Creates an embedder producing vectors of the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            entries: HashMap::new(),
        }
    }

    /// Pins the passage-mode vector for a text.
    ///
    /// # Panics
    ///
    /// Panics when `values` is empty or non-finite; fixtures are
    /// programmer-supplied.
    #[must_use]
    pub fn with_passage(mut self, text: impl Into<String>, values: Vec<f32>) -> Self {
        let vector = EmbeddingVector::new(values).expect("fixture vector must be valid");
        self.entries.insert((EmbedMode::Passage, text.into()), vector);
        self
    }

    /// Pins the query-mode vector for a text.
    ///
    /// # Panics
    ///
    /// Panics when `values` is empty or non-finite; fixtures are
    /// programmer-supplied.
    #[must_use]
    pub fn with_query(mut self, text: impl Into<String>, values: Vec<f32>) -> Self {
        let vector = EmbeddingVector::new(values).expect("fixture vector must be valid");
        self.entries.insert((EmbedMode::Query, text.into()), vector);
        self
    }

    /// Pins the same vector for both conventions.
    #[must_use]
    pub fn with_text(self, text: impl Into<String>, values: Vec<f32>) -> Self {
        let text = text.into();
        self.with_passage(text.clone(), values.clone())
            .with_query(text, values)
    }

    fn hashed_vector(&self, text: &str) -> EmbeddingVector {
        let mut values = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            let bucket = (usize::from(byte) * 31 + i * 7) % self.dimensions;
            values[bucket] += 1.0;
        }
        if values.iter().all(|v| *v == 0.0) {
            values[0] = 1.0;
        }
        let magnitude = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        for value in &mut values {
            *value /= magnitude;
        }
        EmbeddingVector::new(values).expect("hashed vector is non-empty and finite")
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        mode: EmbedMode,
    ) -> RetrievalResult<Vec<EmbeddingVector>> {
        Ok(texts
            .iter()
            .map(|text| {
                self.entries
                    .get(&(mode, text.clone()))
                    .cloned()
                    .unwrap_or_else(|| self.hashed_vector(text))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_vectors() {
        let err = EmbeddingVector::new(vec![]).expect_err("empty vector should error");
        assert!(matches!(err, RetrievalError::InvalidVector(_)));
    }

    #[test]
    fn rejects_non_finite_values() {
        let err = EmbeddingVector::new(vec![1.0, f32::NAN]).expect_err("nan not allowed");
        assert!(matches!(err, RetrievalError::InvalidVector(_)));
    }

    #[test]
    fn cosine_of_identical_unit_vectors_is_one() {
        let a = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        let b = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        assert!((a.cosine(&b) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_of_mismatched_dimensions_is_zero() {
        let a = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        let b = EmbeddingVector::new(vec![1.0, 0.0, 0.0]).unwrap();
        assert_eq!(a.cosine(&b), 0.0);
    }

    #[test]
    fn serialization_roundtrip() {
        let embedding = EmbeddingVector::new(vec![0.1, 0.2, 0.3]).unwrap();
        let json = serde_json::to_string(&embedding).unwrap();
        let decoded: EmbeddingVector = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.as_slice(), embedding.as_slice());
    }

    #[tokio::test]
    async fn fixture_entries_override_hashed_fallback() {
        let embedder = StaticEmbedder::new(3)
            .with_query("보험료 얼마야?", vec![0.0, 1.0, 0.0])
            .with_passage("보험료 얼마야?", vec![0.0, 0.0, 1.0]);

        let query = embedder
            .embed(&["보험료 얼마야?".into()], EmbedMode::Query)
            .await
            .unwrap();
        let passage = embedder
            .embed(&["보험료 얼마야?".into()], EmbedMode::Passage)
            .await
            .unwrap();

        assert_eq!(query[0].as_slice(), [0.0, 1.0, 0.0]);
        assert_eq!(passage[0].as_slice(), [0.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn hashed_fallback_is_deterministic_and_normalized() {
        let embedder = StaticEmbedder::new(8);
        let a = embedder
            .embed(&["unseen text".into()], EmbedMode::Query)
            .await
            .unwrap();
        let b = embedder
            .embed(&["unseen text".into()], EmbedMode::Passage)
            .await
            .unwrap();

        assert_eq!(a[0].as_slice(), b[0].as_slice());
        let norm: f32 = a[0].as_slice().iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
