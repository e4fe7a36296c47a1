use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    CreateDirs,
    RenameDirs,
    MoveItems,
    IndexFinalize,
    Done,
}

impl ApplyPhase {
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateDirs => "create_dirs",
            Self::RenameDirs => "rename_dirs",
            Self::MoveItems => "move_items",
            Self::IndexFinalize => "index_finalize",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyProgress {
    pub phase: ApplyPhase,
    pub done: usize,
    pub total: usize,
    pub current_item: Option<String>,
    pub errors: usize,
}

/// Pure observer of apply progress; never paces the run.
pub trait ProgressSink {
    fn report(&self, progress: &ApplyProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&ApplyProgress),
{
    fn report(&self, progress: &ApplyProgress) {
        self(progress)
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: &ApplyProgress) {}
}

pub fn phase_percent(processed: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    ((processed as f64 / total as f64) * 100.0)
        .round()
        .clamp(0.0, 100.0) as usize
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub simulated: bool,
    pub created_dirs: usize,
    pub moved: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoReport {
    pub reverted: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_percent_handles_empty_and_full() {
        assert_eq!(phase_percent(0, 0), 0);
        assert_eq!(phase_percent(1, 3), 33);
        assert_eq!(phase_percent(3, 3), 100);
    }

    #[test]
    fn closures_are_progress_sinks() {
        let seen = std::cell::RefCell::new(Vec::new());
        let sink = |p: &ApplyProgress| seen.borrow_mut().push(p.phase);
        sink.report(&ApplyProgress {
            phase: ApplyPhase::Done,
            done: 0,
            total: 0,
            current_item: None,
            errors: 0,
        });
        assert_eq!(seen.into_inner(), vec![ApplyPhase::Done]);
    }
}
