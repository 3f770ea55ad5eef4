use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use quill_core::errors::CompletionError;
use quill_core::messages::Turn;
use quill_core::provider::{CompletionClient, CompletionOptions, FragmentStream};
use quill_core::stream::StreamFragment;

/// Scripted replies for deterministic tests without an endpoint.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Whole text; streamed as a single fragment.
    Text(String),
    /// Exact fragment sequence to stream. `complete` concatenates the text.
    Fragments(Vec<StreamFragment>),
    /// Fail the call. Streams see it as a single error fragment.
    Error(CompletionError),
    /// Wait, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn fragments(parts: &[&str]) -> Self {
        Self::Fragments(parts.iter().map(|p| StreamFragment::Text(p.to_string())).collect())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// [`CompletionClient`] that pops one scripted reply per call, in order.
pub struct MockCompletionClient {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<Vec<Turn>>>,
    call_count: AtomicUsize,
}

impl MockCompletionClient {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Message lists received so far, one entry per call.
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<Vec<Turn>> {
        self.requests.lock().last().cloned()
    }

    async fn next_reply(&self, turns: &[Turn]) -> Result<Vec<StreamFragment>, CompletionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(turns.to_vec());

        let reply = self.replies.lock().pop_front();
        let Some(mut current) = reply else {
            return Err(CompletionError::Configuration(format!(
                "mock client has no reply scripted for call {idx}"
            )));
        };

        // Nested delays unroll iteratively.
        loop {
            match current {
                MockReply::Text(text) => return Ok(vec![StreamFragment::Text(text)]),
                MockReply::Fragments(fragments) => return Ok(fragments),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        turns: &[Turn],
        _options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let mut text = String::new();
        for fragment in self.next_reply(turns).await? {
            match fragment {
                StreamFragment::Text(t) => text.push_str(&t),
                StreamFragment::Error(e) => return Err(e),
            }
        }
        Ok(text)
    }

    async fn stream_complete(&self, turns: &[Turn], _options: &CompletionOptions) -> FragmentStream {
        match self.next_reply(turns).await {
            Ok(fragments) => Box::pin(stream::iter(fragments)),
            Err(e) => Box::pin(stream::iter([StreamFragment::Error(e)])),
        }
    }
}
