pub mod client;
pub mod decoder;
pub mod lines;
pub mod summarizer;
pub mod wire;

pub mod mock;

pub use client::{ChatCompletionsClient, ClientConfig};
pub use decoder::{decode_lines, decode_stream, DeltaDecoder, LineOutcome};
pub use mock::{MockCompletionClient, MockReply};
pub use summarizer::LlmSummarizer;
