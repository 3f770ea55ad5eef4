use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;
use crate::messages::{Role, Turn};

pub const DEFAULT_TITLE: &str = "Untitled";

/// The mutable record of one dialogue.
///
/// `turns[..fold_boundary]` are represented by `summary` when building model
/// context but are kept verbatim for display. Turns are only ever appended;
/// `summary` and `fold_boundary` only change together through [`Conversation::apply_fold`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConversationRecord")]
pub struct Conversation {
    id: ConversationId,
    title: String,
    created_at: DateTime<Utc>,
    summary: String,
    fold_boundary: usize,
    turns: Vec<Turn>,
}

impl Conversation {
    /// Start a fresh conversation, optionally seeded with a carried-over summary.
    pub fn new(seed_summary: impl Into<String>) -> Self {
        Self {
            id: ConversationId::new(),
            title: DEFAULT_TITLE.to_string(),
            created_at: Utc::now(),
            summary: seed_summary.into(),
            fold_boundary: 0,
            turns: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(String::new())
    }

    pub fn add_user_turn(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::new(Role::User, text));
    }

    pub fn add_assistant_turn(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::new(Role::Assistant, text));
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn fold_boundary(&self) -> usize {
        self.fold_boundary
    }

    /// Every turn, folded or not.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns still sent to the model verbatim.
    pub fn unfolded_turns(&self) -> &[Turn] {
        &self.turns[self.fold_boundary..]
    }

    pub fn unfolded_count(&self) -> usize {
        self.turns.len() - self.fold_boundary
    }

    /// Replace the summary and advance the boundary in one step.
    ///
    /// Returns `false` and leaves the record untouched when `end_index` would not
    /// move the boundary forward or lies past the last turn.
    pub fn apply_fold(&mut self, summary: impl Into<String>, end_index: usize) -> bool {
        if end_index <= self.fold_boundary || end_index > self.turns.len() {
            return false;
        }
        self.summary = summary.into();
        self.fold_boundary = end_index;
        true
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::empty()
    }
}

/// Unchecked on-disk shape; validated into a [`Conversation`].
#[derive(Deserialize)]
struct ConversationRecord {
    id: ConversationId,
    #[serde(default = "default_title")]
    title: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    fold_boundary: usize,
    #[serde(default)]
    turns: Vec<Turn>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = String;

    fn try_from(r: ConversationRecord) -> Result<Self, Self::Error> {
        if r.fold_boundary > r.turns.len() {
            return Err(format!(
                "fold_boundary {} exceeds turn count {}",
                r.fold_boundary,
                r.turns.len()
            ));
        }
        Ok(Self {
            id: r.id,
            title: r.title,
            created_at: r.created_at,
            summary: r.summary,
            fold_boundary: r.fold_boundary,
            turns: r.turns,
        })
    }
}
