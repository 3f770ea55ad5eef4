/// SQL DDL for the conversation database.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    session TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    fold_boundary INTEGER NOT NULL DEFAULT 0,
    turns TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
