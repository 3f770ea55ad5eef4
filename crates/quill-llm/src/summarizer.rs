use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use quill_core::errors::CompletionError;
use quill_core::messages::Turn;
use quill_core::provider::{CompletionClient, CompletionOptions};
use quill_core::summarizer::Summarizer;

const SUMMARY_INSTRUCTIONS: &str = "You maintain the running summary of a collaborative story. \
Merge the existing summary with the new dialogue excerpt into one updated summary. \
Keep names, places, open plot threads, and the protagonist's current situation. \
Write in the past tense, in plain prose, with no preamble or headings.";

/// [`Summarizer`] backed by one non-streaming completion call.
pub struct LlmSummarizer {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn CompletionClient>, options: CompletionOptions) -> Self {
        Self { client, options }
    }

    fn request(existing_summary: &str, new_text: &str) -> Vec<Turn> {
        let existing = if existing_summary.trim().is_empty() {
            "(none yet)"
        } else {
            existing_summary
        };
        vec![
            Turn::system(SUMMARY_INSTRUCTIONS),
            Turn::user(format!(
                "Existing summary:\n{existing}\n\nNew excerpt:\n{new_text}\n\nUpdated summary:"
            )),
        ]
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    #[instrument(skip_all, fields(existing_len = existing_summary.len(), new_len = new_text.len()))]
    async fn update(&self, existing_summary: &str, new_text: &str) -> Result<String, CompletionError> {
        let turns = Self::request(existing_summary, new_text);
        let summary = self.client.complete(&turns, &self.options).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CompletionError::ResponseShape("summarizer returned empty text".into()));
        }
        debug!(summary_len = summary.len(), "summary updated");
        Ok(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCompletionClient, MockReply};

    #[tokio::test]
    async fn merges_existing_summary_and_excerpt() {
        let mock = Arc::new(MockCompletionClient::new(vec![MockReply::text("  Ada found the key.\n")]));
        let summarizer = LlmSummarizer::new(mock.clone(), CompletionOptions::default());

        let summary = summarizer
            .update("Ada entered the tower.", "user: open the chest\nassistant: a key glints")
            .await
            .unwrap();
        assert_eq!(summary, "Ada found the key.");

        let request = mock.last_request().unwrap();
        assert_eq!(request.len(), 2);
        assert!(request[1].content.contains("Ada entered the tower."));
        assert!(request[1].content.contains("assistant: a key glints"));
    }

    #[tokio::test]
    async fn empty_existing_summary_is_marked() {
        let mock = Arc::new(MockCompletionClient::new(vec![MockReply::text("s")]));
        let summarizer = LlmSummarizer::new(mock.clone(), CompletionOptions::default());
        summarizer.update("", "user: hi").await.unwrap();
        assert!(mock.last_request().unwrap()[1].content.contains("(none yet)"));
    }

    #[tokio::test]
    async fn blank_result_is_an_error() {
        let mock = Arc::new(MockCompletionClient::new(vec![MockReply::text("   ")]));
        let summarizer = LlmSummarizer::new(mock, CompletionOptions::default());
        let err = summarizer.update("", "user: hi").await.unwrap_err();
        assert!(matches!(err, CompletionError::ResponseShape(_)));
    }

    #[tokio::test]
    async fn client_errors_propagate() {
        let mock = Arc::new(MockCompletionClient::new(vec![MockReply::Error(CompletionError::Upstream {
            status: 503,
            body: "busy".into(),
        })]));
        let summarizer = LlmSummarizer::new(mock, CompletionOptions::default());
        let err = summarizer.update("", "user: hi").await.unwrap_err();
        assert_eq!(err.upstream_status(), Some(503));
    }
}
