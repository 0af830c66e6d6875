//! Conversation state persistence, keyed by session id.
//!
//! The store owns per-session state exclusively; the caller is responsible
//! for serializing turns per session key: no two turns for the same
//! session may execute concurrently.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use switchboard_primitives::SessionId;

use crate::state::TurnState;
use crate::KernelResult;

/// Persists [`TurnState`] between turns.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the current state for the session, if any exists.
    async fn load(&self, session: &SessionId) -> KernelResult<Option<TurnState>>;

    /// Persists the state for the session, replacing any previous snapshot.
    async fn save(&self, session: &SessionId, state: &TurnState) -> KernelResult<()>;
}

/// In-process checkpoint store. Conversations reset on restart; production
/// deployments implement [`CheckpointStore`] over a durable backend.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    sessions: RwLock<HashMap<SessionId, TurnState>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tracked sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evicts a session, returning whether it existed.
    pub async fn evict(&self, session: &SessionId) -> bool {
        self.sessions.write().await.remove(session).is_some()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, session: &SessionId) -> KernelResult<Option<TurnState>> {
        Ok(self.sessions.read().await.get(session).cloned())
    }

    async fn save(&self, session: &SessionId, state: &TurnState) -> KernelResult<()> {
        self.sessions
            .write()
            .await
            .insert(session.clone(), state.clone());
        Ok(())
    }
}
