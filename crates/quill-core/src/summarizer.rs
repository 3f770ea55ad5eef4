use async_trait::async_trait;

use crate::errors::CompletionError;

/// Folds new dialogue text into a running summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Return a summary covering both `existing_summary` (may be empty) and `new_text`.
    async fn update(&self, existing_summary: &str, new_text: &str) -> Result<String, CompletionError>;
}
