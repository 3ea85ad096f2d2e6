use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::conversation::Conversation;
use crate::errors::LlmResult;
use crate::metrics::Metrics;

/// The interface an agent drives a model through
#[async_trait]
pub trait Llm: Send + Sync {
    /// Display name of the model family
    fn name(&self) -> &str;

    /// Model identifier sent to the backend
    fn model(&self) -> &str;

    /// Text the model needs in its system prompt to use this adapter's features
    fn system_prompt(&self) -> LlmResult<Option<String>>;

    /// Answer the last message, running any requested tools, and return the
    /// visible text of every turn it took. New messages are appended to
    /// `conversation` and every backend latency to `metrics`.
    async fn respond(
        &self,
        conversation: &mut Conversation,
        metrics: &mut Metrics,
    ) -> LlmResult<String>;

    /// Same as [`Llm::respond`], yielding visible text as it is generated.
    ///
    /// Dropping the stream early abandons the backend stream and any tool
    /// calls not yet run; the conversation keeps what was appended so far.
    fn respond_stream<'a>(
        &'a self,
        conversation: &'a mut Conversation,
        metrics: &'a mut Metrics,
    ) -> BoxStream<'a, LlmResult<String>>;
}
