pub mod context;
pub mod error;
pub mod prompt;
pub mod scheduler;
pub mod session;

pub use context::{build_context, estimate_context_tokens};
pub use error::EngineError;
pub use prompt::{DefaultPromptBuilder, PromptBuilder};
pub use scheduler::{FoldOutcome, FoldPolicy, FoldScheduler};
pub use session::{SessionEvent, WritingSession};
