//! Curated retrieval metadata describing tools.
//!
//! A tool card carries the purpose sentence, positive usage examples, and
//! domain tags that feed the retrieval index, plus negative examples that
//! feed only the model-facing description. Negative examples contain other
//! tools' vocabulary, so embedding them would dilute the similarity signal;
//! they are excluded from `embed_text` and surfaced through
//! `disambiguation_text` instead.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for card operations.
pub type CardResult<T> = Result<T, CardError>;

/// Errors produced when constructing tool cards.
#[derive(Debug, Error)]
pub enum CardError {
    /// The card failed validation.
    #[error("invalid tool card: {reason}")]
    InvalidCard {
        /// Human-readable reason for rejection.
        reason: String,
    },
}

/// Immutable per-tool retrieval metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCard {
    name: String,
    purpose: String,
    #[serde(default)]
    when_to_use: Vec<String>,
    #[serde(default)]
    when_not_to_use: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

impl ToolCard {
    /// Creates a card for the supplied tool name and purpose sentence.
    ///
    /// # Errors
    ///
    /// Returns [`CardError::InvalidCard`] if either field is blank. The name
    /// must match the registered tool name exactly or the card is inert.
    pub fn new(name: impl Into<String>, purpose: impl Into<String>) -> CardResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CardError::InvalidCard {
                reason: "card name cannot be empty".into(),
            });
        }

        let purpose = purpose.into();
        if purpose.trim().is_empty() {
            return Err(CardError::InvalidCard {
                reason: "card purpose cannot be empty".into(),
            });
        }

        Ok(Self {
            name,
            purpose,
            when_to_use: Vec::new(),
            when_not_to_use: Vec::new(),
            tags: Vec::new(),
        })
    }

    /// Adds positive example utterances, in order.
    #[must_use]
    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.when_to_use
            .extend(examples.into_iter().map(Into::into));
        self
    }

    /// Adds "don't use here, use X instead" counter-examples, in order.
    #[must_use]
    pub fn with_counter_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.when_not_to_use
            .extend(examples.into_iter().map(Into::into));
        self
    }

    /// Adds short domain labels.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Returns the tool name this card describes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the one-sentence purpose description.
    #[must_use]
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Returns the positive example utterances.
    #[must_use]
    pub fn when_to_use(&self) -> &[String] {
        &self.when_to_use
    }

    /// Returns the negative example utterances.
    #[must_use]
    pub fn when_not_to_use(&self) -> &[String] {
        &self.when_not_to_use
    }

    /// Returns the domain tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Renders the text hashed into the index version marker.
    ///
    /// Purpose, then each positive example, then the joined tag string,
    /// newline-separated. Negative examples are excluded: they quote other
    /// tools' vocabulary and would pull this tool toward their queries.
    #[must_use]
    pub fn embed_text(&self) -> String {
        let mut parts = vec![self.purpose.clone()];
        parts.extend(self.when_to_use.iter().cloned());
        if !self.tags.is_empty() {
            parts.push(self.tags.join(" "));
        }
        parts.join("\n")
    }

    /// Renders the negative examples for the model-facing tool description.
    ///
    /// Returns `None` when the card has no counter-examples.
    #[must_use]
    pub fn disambiguation_text(&self) -> Option<String> {
        if self.when_not_to_use.is_empty() {
            return None;
        }
        let mut text = String::from("사용하면 안 되는 경우:");
        for line in &self.when_not_to_use {
            text.push_str("\n- ");
            text.push_str(line);
        }
        Some(text)
    }
}

/// Lookup table of published tool cards, keyed by tool name.
///
/// Pure lookup with no side effects. A registered tool without a card is a
/// diagnostic condition, not an error: the retrieval index falls back to the
/// tool's own description.
#[derive(Debug, Default)]
pub struct CardRegistry {
    cards: RwLock<HashMap<String, ToolCard>>,
}

impl CardRegistry {
    /// Creates an empty card registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a card, returning the previous one if present.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert(&self, card: ToolCard) -> Option<ToolCard> {
        let mut cards = self.cards.write().expect("card registry poisoned");
        cards.insert(card.name().to_owned(), card)
    }

    /// Returns the card for the supplied tool name, if one is published.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolCard> {
        let cards = self.cards.read().ok()?;
        cards.get(name).cloned()
    }

    /// Returns every published card.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn all(&self) -> Vec<ToolCard> {
        let cards = self.cards.read().expect("card registry poisoned");
        cards.values().cloned().collect()
    }

    /// Returns the subset of `names` that have no published card.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn missing_for<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let cards = self.cards.read().expect("card registry poisoned");
        names
            .into_iter()
            .filter(|name| !cards.contains_key(*name))
            .map(ToOwned::to_owned)
            .collect()
    }
}
