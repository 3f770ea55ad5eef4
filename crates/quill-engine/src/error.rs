use quill_core::errors::CompletionError;
use quill_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
