use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::CompletionError;
use crate::messages::Turn;
use crate::stream::StreamFragment;

pub type FragmentStream = Pin<Box<dyn Stream<Item = StreamFragment> + Send>>;

/// Sampling options for one completion call.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            max_tokens: 1024,
        }
    }
}

/// The only network-facing boundary: a chat-completions endpoint.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// One full completion. Every failure is returned as an error.
    async fn complete(
        &self,
        turns: &[Turn],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;

    /// A streamed completion. Never fails outright: configuration, transport and
    /// upstream failures arrive as a single [`StreamFragment::Error`].
    async fn stream_complete(&self, turns: &[Turn], options: &CompletionOptions) -> FragmentStream;
}
