use crate::data::repository::MoveHistoryEntry;
use crate::data::FileIndex;
use crate::error::AppError;
use crate::models::operation::{OperationType, UndoEntry, UndoLog};
use crate::models::progress::UndoReport;
use crate::services::file_service;
use std::fs;
use std::path::Path;

/// Runs the compensating action for one entry.
pub fn reverse(entry: &UndoEntry, index: &dyn FileIndex) -> Result<(), AppError> {
    match entry {
        UndoEntry::CreatedDir { path } => {
            if !file_service::remove_dir_if_empty(path)? {
                tracing::debug!(path = %path.display(), "created directory kept: not empty");
            }
        }
        UndoEntry::MovedFile { from, to } => {
            ensure_parent(from)?;
            file_service::rename(to, from)?;
            if let Err(err) = index.update_path(to, from) {
                tracing::warn!(error = %err, path = %from.display(), "index path not restored");
            }
            record_history(index, to, from);
        }
        UndoEntry::CopiedFile {
            source,
            destination,
        } => {
            ensure_parent(source)?;
            file_service::copy_file(destination, source)?;
            if let Err(err) = index.migrate_suggestion(destination, source) {
                tracing::warn!(error = %err, path = %source.display(), "index record not migrated back");
            }
            fs::remove_file(destination)?;
            record_history(index, destination, source);
        }
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn record_history(index: &dyn FileIndex, old_path: &Path, new_path: &Path) {
    let entry = MoveHistoryEntry {
        old_path: old_path.to_string_lossy().to_string(),
        new_path: new_path.to_string_lossy().to_string(),
        operation: OperationType::UndoMove,
        reason: Some("undo".to_string()),
        moved_at: None,
    };
    if let Err(err) = index.append_move_history(&entry) {
        tracing::warn!(error = %err, "undo history not recorded");
    }
}

/// Reverts every entry newest first. Failures are counted and skipped; the
/// log is empty afterwards.
pub fn undo_all(log: &mut UndoLog, index: &dyn FileIndex) -> UndoReport {
    let mut report = UndoReport::default();
    for entry in log.drain_newest_first() {
        match reverse(&entry, index) {
            Ok(()) => report.reverted += 1,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(error = %err, entry = ?entry, "undo step failed");
            }
        }
    }
    report
}
