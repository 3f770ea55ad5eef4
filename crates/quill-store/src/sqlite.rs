use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tracing::{info, instrument};

use quill_core::conversation::Conversation;

use crate::error::StoreError;
use crate::names::validate_session_name;
use crate::schema;
use crate::ConversationStore;

/// All sessions in one SQLite file, one row per session.
/// rusqlite's `Connection` is not `Sync`, so access goes through a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "conversation database opened");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(schema::PRAGMAS)
            .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ConversationStore for SqliteStore {
    #[instrument(skip(self))]
    fn load(&self, session: &str) -> Result<Option<Conversation>, StoreError> {
        validate_session_name(session)?;
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, title, created_at, summary, fold_boundary, turns
                 FROM conversations WHERE session = ?1",
                [session],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, title, created_at, summary, fold_boundary, turns)) = row else {
            return Ok(None);
        };

        // Rebuild through serde so the boundary invariant is checked on load.
        let turns: serde_json::Value = serde_json::from_str(&turns)?;
        let record = serde_json::json!({
            "id": id,
            "title": title,
            "created_at": created_at,
            "summary": summary,
            "fold_boundary": fold_boundary,
            "turns": turns,
        });
        Ok(Some(serde_json::from_value(record)?))
    }

    #[instrument(skip(self, conversation), fields(turns = conversation.len()))]
    fn save(&self, session: &str, conversation: &Conversation) -> Result<(), StoreError> {
        validate_session_name(session)?;
        let turns = serde_json::to_string(conversation.turns())?;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (session, id, title, created_at, summary, fold_boundary, turns, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(session) DO UPDATE SET
                id = excluded.id,
                title = excluded.title,
                created_at = excluded.created_at,
                summary = excluded.summary,
                fold_boundary = excluded.fold_boundary,
                turns = excluded.turns,
                updated_at = excluded.updated_at",
            rusqlite::params![
                session,
                conversation.id().as_str(),
                conversation.title(),
                conversation.created_at().to_rfc3339(),
                conversation.summary(),
                conversation.fold_boundary() as i64,
                turns,
                now,
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT session FROM conversations ORDER BY session")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    #[instrument(skip(self))]
    fn delete(&self, session: &str) -> Result<bool, StoreError> {
        validate_session_name(session)?;
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM conversations WHERE session = ?1", [session])?;
        Ok(removed > 0)
    }
}
