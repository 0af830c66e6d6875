//! Retrying wrapper around chat-model invocation.

use switchboard_primitives::RetryPolicy;

use crate::traits::{AdapterError, AdapterResult, ChatMessage, ChatModel, InferenceRequest};

/// Invokes the model, retrying transient provider failures.
///
/// Rate limits and transport errors back off exponentially under the given
/// policy; all other errors propagate immediately, and the last error is
/// reraised once attempts are exhausted.
///
/// # Errors
///
/// Returns the first non-transient [`AdapterError`], or the final transient
/// one after the attempt cap.
pub async fn invoke_with_retry(
    model: &dyn ChatModel,
    request: InferenceRequest,
    policy: &RetryPolicy,
) -> AdapterResult<ChatMessage> {
    policy
        .run("model_inference", AdapterError::is_transient, || {
            model.invoke(request.clone())
        })
        .await
}
