use serde::{Deserialize, Serialize};

/// Caller-owned writing context. Read at context-build time, never persisted by the core.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaContext {
    pub background: String,
    pub protagonist: String,
}

impl PersonaContext {
    pub fn new(background: impl Into<String>, protagonist: impl Into<String>) -> Self {
        Self {
            background: background.into(),
            protagonist: protagonist.into(),
        }
    }
}
