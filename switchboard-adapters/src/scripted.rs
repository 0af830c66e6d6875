//! Scripted chat model for tests and demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::traits::{
    AdapterError, AdapterMetadata, AdapterResult, ChatMessage, ChatModel, InferenceRequest,
};

/// Chat model that replays a fixed script of responses.
///
/// Each [`ChatModel::invoke`] pops the next scripted outcome; an exhausted
/// script yields a response error. Every received request is recorded so
/// tests can assert on bound tools and message shaping.
pub struct ScriptedChatModel {
    metadata: AdapterMetadata,
    script: Mutex<VecDeque<AdapterResult<ChatMessage>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedChatModel {
    /// Creates an empty script for the given model label.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            metadata: AdapterMetadata::new("scripted", model),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Appends a successful response to the script.
    ///
    /// # Panics
    ///
    /// Panics if the internal script lock is poisoned.
    #[must_use]
    pub fn then_message(self, message: ChatMessage) -> Self {
        self.script
            .lock()
            .expect("script poisoned")
            .push_back(Ok(message));
        self
    }

    /// Appends a failure to the script.
    ///
    /// # Panics
    ///
    /// Panics if the internal script lock is poisoned.
    #[must_use]
    pub fn then_error(self, error: AdapterError) -> Self {
        self.script
            .lock()
            .expect("script poisoned")
            .push_back(Err(error));
        self
    }

    /// Returns every request received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal request lock is poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().expect("requests poisoned").clone()
    }

    /// Returns how many scripted outcomes remain unconsumed.
    ///
    /// # Panics
    ///
    /// Panics if the internal script lock is poisoned.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script poisoned").len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn invoke(&self, request: InferenceRequest) -> AdapterResult<ChatMessage> {
        self.requests
            .lock()
            .expect("requests poisoned")
            .push(request);
        self.script
            .lock()
            .expect("script poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(AdapterError::response("scripted model exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_in_order_then_exhausts() {
        let model = ScriptedChatModel::new("test")
            .then_message(ChatMessage::assistant("첫 번째"))
            .then_message(ChatMessage::assistant("두 번째"));

        let request = InferenceRequest::new(vec![ChatMessage::human("질문")]).unwrap();

        let first = model.invoke(request.clone()).await.unwrap();
        assert_eq!(first.content(), "첫 번째");
        let second = model.invoke(request.clone()).await.unwrap();
        assert_eq!(second.content(), "두 번째");

        let err = model.invoke(request).await.expect_err("script exhausted");
        assert!(matches!(err, AdapterError::Response { .. }));
        assert_eq!(model.requests().len(), 3);
    }
}
