use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS suggestions (
    file_key TEXT PRIMARY KEY NOT NULL,
    path TEXT NOT NULL,
    rel_path TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0,
    summary TEXT,
    snippet TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_suggestions_path ON suggestions(path);
CREATE INDEX IF NOT EXISTS idx_suggestions_rel_path ON suggestions(rel_path);

CREATE TABLE IF NOT EXISTS move_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    old_path TEXT NOT NULL,
    new_path TEXT NOT NULL,
    operation TEXT NOT NULL,
    reason TEXT,
    moved_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_move_history_time ON move_history(moved_at DESC);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}
