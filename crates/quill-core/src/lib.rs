pub mod conversation;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod persona;
pub mod provider;
pub mod stream;
pub mod summarizer;

pub use conversation::Conversation;
pub use errors::CompletionError;
pub use ids::ConversationId;
pub use messages::{Role, Turn};
pub use persona::PersonaContext;
pub use provider::{CompletionClient, CompletionOptions, FragmentStream};
pub use stream::StreamFragment;
pub use summarizer::Summarizer;
