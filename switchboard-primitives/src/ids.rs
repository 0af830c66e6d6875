//! Session identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

const MAX_SESSION_ID_LEN: usize = 128;

/// Identifier for a persisted conversation session.
///
/// Sessions are keyed by an external caller-supplied identifier; the
/// checkpoint store serializes all turns for a given id. Identifiers are
/// restricted to word characters plus `-`, `:`, and `.` so they can be
/// embedded in URLs and log lines without escaping.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session identifier from a caller-supplied string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSessionId`] when the string is empty, longer
    /// than 128 characters, or contains characters outside `[\w\-:.]`.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidSessionId {
                id,
                reason: "session id cannot be empty".into(),
            });
        }
        if id.chars().count() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidSessionId {
                id,
                reason: format!("session id exceeds {MAX_SESSION_ID_LEN} characters"),
            });
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.')))
        {
            return Err(Error::InvalidSessionId {
                id,
                reason: format!("character `{bad}` is not allowed"),
            });
        }
        Ok(Self(id))
    }

    /// Generates a fresh random identifier for callers that did not supply one.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
