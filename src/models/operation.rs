use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of filesystem mutation recorded in the index move history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Move,
    CrossVolumeMove,
    CreateDir,
    RenameDir,
    UndoMove,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Move => write!(f, "move"),
            Self::CrossVolumeMove => write!(f, "cross_volume_move"),
            Self::CreateDir => write!(f, "create_dir"),
            Self::RenameDir => write!(f, "rename_dir"),
            Self::UndoMove => write!(f, "undo_move"),
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "move" => Ok(Self::Move),
            "cross_volume_move" => Ok(Self::CrossVolumeMove),
            "create_dir" => Ok(Self::CreateDir),
            "rename_dir" => Ok(Self::RenameDir),
            "undo_move" => Ok(Self::UndoMove),
            _ => Err(format!("unknown operation type: {s}")),
        }
    }
}

/// One compensating action. Each variant carries exactly what its reversal
/// needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndoEntry {
    /// Reversed by removing `path`, only if it is still empty.
    CreatedDir { path: PathBuf },
    /// Same-volume rename; reversed by renaming `to` back to `from`.
    MovedFile { from: PathBuf, to: PathBuf },
    /// Cross-volume copy+delete; reversed by copying `destination` back to
    /// `source` and re-indexing `source`.
    CopiedFile { source: PathBuf, destination: PathBuf },
}

/// Per-session LIFO log of compensating actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
}

impl UndoLog {
    pub fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[UndoEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Removes all entries, newest first.
    pub fn drain_newest_first(&mut self) -> Vec<UndoEntry> {
        let mut drained = std::mem::take(&mut self.entries);
        drained.reverse();
        drained
    }
}
