use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::operation::OperationType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub file_key: String,
    pub path: String,
    pub rel_path: String,
    pub confidence: f32,
    pub summary: Option<String>,
    pub snippet: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveHistoryEntry {
    pub old_path: String,
    pub new_path: String,
    pub operation: OperationType,
    pub reason: Option<String>,
    pub moved_at: Option<String>,
}

pub fn upsert_suggestion(
    conn: &Connection,
    file_key: &str,
    path: &str,
    rel_path: &str,
    confidence: f32,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO suggestions (file_key, path, rel_path, confidence, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(file_key) DO UPDATE SET
            path = excluded.path,
            rel_path = excluded.rel_path,
            confidence = excluded.confidence,
            updated_at = excluded.updated_at",
        params![
            file_key,
            path,
            rel_path,
            confidence as f64,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn update_summary(
    conn: &Connection,
    file_key: &str,
    summary: &str,
    snippet: Option<&str>,
    tags: &[String],
) -> Result<usize, AppError> {
    let tags_json = serde_json::to_string(tags)?;
    let count = conn.execute(
        "UPDATE suggestions SET summary = ?2, snippet = ?3, tags = ?4 WHERE file_key = ?1",
        params![file_key, summary, snippet, tags_json],
    )?;
    Ok(count)
}

/// Re-keys a record in place after a same-volume rename.
pub fn update_path(
    conn: &Connection,
    old_key: &str,
    new_key: &str,
    new_path: &str,
) -> Result<usize, AppError> {
    if old_key != new_key {
        conn.execute(
            "DELETE FROM suggestions WHERE file_key = ?1",
            params![new_key],
        )?;
    }
    let count = conn.execute(
        "UPDATE suggestions SET file_key = ?2, path = ?3 WHERE file_key = ?1",
        params![old_key, new_key, new_path],
    )?;
    Ok(count)
}

/// Copies the record under `new_key`, then drops the old one.
pub fn migrate_suggestion(
    conn: &Connection,
    old_key: &str,
    new_key: &str,
    new_path: &str,
) -> Result<usize, AppError> {
    if old_key == new_key {
        return Ok(0);
    }
    let count = conn.execute(
        "INSERT OR REPLACE INTO suggestions
            (file_key, path, rel_path, confidence, summary, snippet, tags, updated_at)
         SELECT ?2, ?3, rel_path, confidence, summary, snippet, tags, ?4
         FROM suggestions WHERE file_key = ?1",
        params![old_key, new_key, new_path, chrono::Utc::now().to_rfc3339()],
    )?;
    conn.execute(
        "DELETE FROM suggestions WHERE file_key = ?1",
        params![old_key],
    )?;
    Ok(count)
}

pub fn append_move_history(conn: &Connection, entry: &MoveHistoryEntry) -> Result<i64, AppError> {
    let moved_at = entry
        .moved_at
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    conn.execute(
        "INSERT INTO move_history (old_path, new_path, operation, reason, moved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.old_path,
            entry.new_path,
            entry.operation.to_string(),
            entry.reason,
            moved_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_suggestion(
    conn: &Connection,
    file_key: &str,
) -> Result<Option<SuggestionRecord>, AppError> {
    let record = conn
        .query_row(
            "SELECT file_key, path, rel_path, confidence, summary, snippet, tags
             FROM suggestions WHERE file_key = ?1",
            params![file_key],
            |row| {
                let confidence: f64 = row.get(3)?;
                let tags_str: String = row.get(6)?;
                Ok(SuggestionRecord {
                    file_key: row.get(0)?,
                    path: row.get(1)?,
                    rel_path: row.get(2)?,
                    confidence: confidence as f32,
                    summary: row.get(4)?,
                    snippet: row.get(5)?,
                    tags: serde_json::from_str(&tags_str).unwrap_or_default(),
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// Newest first.
pub fn list_move_history(conn: &Connection, limit: usize) -> Result<Vec<MoveHistoryEntry>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT old_path, new_path, operation, reason, moved_at
         FROM move_history ORDER BY id DESC LIMIT ?1",
    )?;

    let entries = stmt
        .query_map(params![limit as i64], |row| {
            let op_str: String = row.get(2)?;
            Ok(MoveHistoryEntry {
                old_path: row.get(0)?,
                new_path: row.get(1)?,
                operation: op_str.parse::<OperationType>().unwrap_or(OperationType::Move),
                reason: row.get(3)?,
                moved_at: row.get(4)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(entries)
}
