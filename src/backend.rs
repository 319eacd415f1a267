//! The inference server as seen by the submission workflow.
//!
//! The wire protocol lives elsewhere; implementations adapt it to this trait.

use anyhow::Result;
use futures_util::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;

use crate::defaults::AutonamingPolicy;
use crate::sequence::{ChatMessage, MessageId, SequenceId};

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Streamed response text, one chunk per item.
pub type ResponseStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationRequest {
    pub sequence_id: SequenceId,
    /// `None` skips retrieval entirely.
    pub retrieval_policy: Option<String>,
    pub retrieval_search_args: Option<String>,
    pub override_system_prompt: Option<String>,
    pub override_model_template: Option<String>,
    pub seed_assistant_response: Option<String>,
    pub autonaming_policy: AutonamingPolicy,
}

pub trait SequenceBackend: Send + Sync {
    /// Save a message. `Ok(None)` means the server accepted the call but returned no id.
    fn construct_message<'a>(&'a self, message: &'a ChatMessage) -> BackendFuture<'a, Option<MessageId>>;

    /// Create a new sequence whose first message is `message_id`.
    fn create_sequence<'a>(
        &'a self,
        message_id: MessageId,
        human_desc: Option<&'a str>,
    ) -> BackendFuture<'a, Option<SequenceId>>;

    /// Append a saved message to an existing sequence.
    fn extend_sequence<'a>(
        &'a self,
        sequence_id: SequenceId,
        message_id: MessageId,
    ) -> BackendFuture<'a, Option<SequenceId>>;

    /// Run inference on the sequence and stream the assistant reply.
    fn generate<'a>(&'a self, request: GenerationRequest) -> BackendFuture<'a, ResponseStream>;
}
