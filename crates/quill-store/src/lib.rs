//! Conversation persistence keyed by session name.

pub mod error;
pub mod json_file;
pub mod names;
pub mod schema;
pub mod sqlite;

use quill_core::conversation::Conversation;

pub use error::StoreError;
pub use json_file::JsonFileStore;
pub use names::validate_session_name;
pub use sqlite::SqliteStore;

/// Load/save a whole [`Conversation`] under a session name.
///
/// Implementations validate the name with [`validate_session_name`] before
/// touching storage.
pub trait ConversationStore: Send + Sync {
    /// `None` when nothing is stored under `session`.
    fn load(&self, session: &str) -> Result<Option<Conversation>, StoreError>;

    /// Replace whatever is stored under `session`.
    fn save(&self, session: &str, conversation: &Conversation) -> Result<(), StoreError>;

    /// Stored session names, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Returns whether anything was removed.
    fn delete(&self, session: &str) -> Result<bool, StoreError>;
}
