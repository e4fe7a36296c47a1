pub mod migrations;
pub mod repository;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;
use crate::scope_path::stable_key;
use repository::{MoveHistoryEntry, SuggestionRecord};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistent per-file record store, keyed by [`stable_key`].
pub trait FileIndex: Send + Sync {
    fn upsert_suggestion(&self, path: &Path, rel_path: &str, confidence: f32)
        -> Result<(), AppError>;

    fn update_summary(
        &self,
        path: &Path,
        summary: &str,
        snippet: Option<&str>,
        tags: &[String],
    ) -> Result<(), AppError>;

    fn update_path(&self, old_path: &Path, new_path: &Path) -> Result<(), AppError>;

    fn migrate_suggestion(&self, old_path: &Path, new_path: &Path) -> Result<(), AppError>;

    fn append_move_history(&self, entry: &MoveHistoryEntry) -> Result<(), AppError>;
}

/// Index that records nothing.
pub struct NullIndex;

impl FileIndex for NullIndex {
    fn upsert_suggestion(&self, _: &Path, _: &str, _: f32) -> Result<(), AppError> {
        Ok(())
    }

    fn update_summary(&self, _: &Path, _: &str, _: Option<&str>, _: &[String]) -> Result<(), AppError> {
        Ok(())
    }

    fn update_path(&self, _: &Path, _: &Path) -> Result<(), AppError> {
        Ok(())
    }

    fn migrate_suggestion(&self, _: &Path, _: &Path) -> Result<(), AppError> {
        Ok(())
    }

    fn append_move_history(&self, _: &MoveHistoryEntry) -> Result<(), AppError> {
        Ok(())
    }
}

/// Index whose every write fails. Counts the attempts.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FailingIndex {
    pub calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FailingIndex {
    fn fail(&self, operation: &str) -> Result<(), AppError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Err(AppError::General(format!("index offline: {operation}")))
    }
}

#[cfg(test)]
impl FileIndex for FailingIndex {
    fn upsert_suggestion(&self, _: &Path, _: &str, _: f32) -> Result<(), AppError> {
        self.fail("upsert_suggestion")
    }

    fn update_summary(&self, _: &Path, _: &str, _: Option<&str>, _: &[String]) -> Result<(), AppError> {
        self.fail("update_summary")
    }

    fn update_path(&self, _: &Path, _: &Path) -> Result<(), AppError> {
        self.fail("update_path")
    }

    fn migrate_suggestion(&self, _: &Path, _: &Path) -> Result<(), AppError> {
        self.fail("migrate_suggestion")
    }

    fn append_move_history(&self, _: &MoveHistoryEntry) -> Result<(), AppError> {
        self.fail("append_move_history")
    }
}

/// SQLite-backed index. Writes go through one connection guarded by this
/// instance's mutex; file-backed stores read on fresh connections.
pub struct SqliteIndex {
    writer: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteIndex {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            db_path: None,
        })
    }

    fn with_writer<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let conn = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }

    fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        match &self.db_path {
            Some(path) => {
                let conn = Connection::open(path).map_err(|e| {
                    AppError::General(format!("Failed to open index for reading: {e}"))
                })?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                f(&conn)
            }
            None => self.with_writer(f),
        }
    }

    pub fn get_suggestion(&self, path: &Path) -> Result<Option<SuggestionRecord>, AppError> {
        let key = stable_key(path);
        self.with_reader(|conn| repository::get_suggestion(conn, &key))
    }

    pub fn move_history(&self, limit: usize) -> Result<Vec<MoveHistoryEntry>, AppError> {
        self.with_reader(|conn| repository::list_move_history(conn, limit))
    }
}

impl FileIndex for SqliteIndex {
    fn upsert_suggestion(
        &self,
        path: &Path,
        rel_path: &str,
        confidence: f32,
    ) -> Result<(), AppError> {
        let key = stable_key(path);
        let path = path.to_string_lossy();
        self.with_writer(|conn| {
            repository::upsert_suggestion(conn, &key, &path, rel_path, confidence)
        })
    }

    fn update_summary(
        &self,
        path: &Path,
        summary: &str,
        snippet: Option<&str>,
        tags: &[String],
    ) -> Result<(), AppError> {
        let key = stable_key(path);
        self.with_writer(|conn| {
            repository::update_summary(conn, &key, summary, snippet, tags).map(|_| ())
        })
    }

    fn update_path(&self, old_path: &Path, new_path: &Path) -> Result<(), AppError> {
        let old_key = stable_key(old_path);
        let new_key = stable_key(new_path);
        let new_path = new_path.to_string_lossy();
        self.with_writer(|conn| {
            repository::update_path(conn, &old_key, &new_key, &new_path).map(|_| ())
        })
    }

    fn migrate_suggestion(&self, old_path: &Path, new_path: &Path) -> Result<(), AppError> {
        let old_key = stable_key(old_path);
        let new_key = stable_key(new_path);
        let new_path = new_path.to_string_lossy();
        self.with_writer(|conn| {
            repository::migrate_suggestion(conn, &old_key, &new_key, &new_path).map(|_| ())
        })
    }

    fn append_move_history(&self, entry: &MoveHistoryEntry) -> Result<(), AppError> {
        self.with_writer(|conn| repository::append_move_history(conn, entry).map(|_| ()))
    }
}
