use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveReason {
    Classified,
    Fallback,
}

impl std::fmt::Display for MoveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classified => write!(f, "classified"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub rel_path: String,
    pub reason: MoveReason,
    pub confidence: f32,
}

/// Legacy directory rename; dry runs never emit these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameDir {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    pub total_files: usize,
    pub classified: usize,
    pub fallback: usize,
    pub unchanged: usize,
    pub moves: usize,
    pub create_dirs: usize,
    pub errors: usize,
}

/// Output of one dry run. Superseded by the next dry run, never edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub base_path: PathBuf,
    /// Relative to `base_path`, distinct case-insensitively.
    pub create_dirs: Vec<String>,
    pub rename_dirs: Vec<RenameDir>,
    pub moves: Vec<PlannedMove>,
    pub unresolved: Vec<PathBuf>,
    pub errors: Vec<String>,
    pub stats: PlanStats,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.create_dirs.is_empty() && self.rename_dirs.is_empty() && self.moves.is_empty()
    }
}
