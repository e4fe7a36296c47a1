use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::data::repository::MoveHistoryEntry;
use crate::data::FileIndex;
use crate::error::AppError;
use crate::models::operation::{OperationType, UndoEntry, UndoLog};
use crate::models::plan::{Plan, PlannedMove};
use crate::models::progress::{
    phase_percent, ApplyPhase, ApplyProgress, ApplyReport, ProgressSink, UndoReport,
};
use crate::scope_path::{is_within_scope, join_rel, same_volume};
use crate::services::{file_service, undo_service};
use crate::state::is_cancelled;

/// Executes plans and keeps the compensating log for the current session.
pub struct PlanApplier {
    index: Arc<dyn FileIndex>,
    undo_log: UndoLog,
}

struct PhaseTracker<'a> {
    sink: &'a dyn ProgressSink,
    phase: ApplyPhase,
    total: usize,
    done: usize,
}

impl<'a> PhaseTracker<'a> {
    fn start(sink: &'a dyn ProgressSink, phase: ApplyPhase, total: usize, errors: usize) -> Self {
        let tracker = Self {
            sink,
            phase,
            total,
            done: 0,
        };
        if total == 0 {
            tracker.emit(None, errors);
        }
        tracker
    }

    fn step(&mut self, item: &str, errors: usize) {
        self.done += 1;
        self.emit(Some(item.to_string()), errors);
    }

    fn emit(&self, current_item: Option<String>, errors: usize) {
        if self.phase.is_terminal() {
            tracing::debug!(errors, "apply reached terminal phase");
        } else {
            tracing::trace!(
                phase = self.phase.name(),
                percent = phase_percent(self.done, self.total),
                errors,
                "apply progress"
            );
        }
        self.sink.report(&ApplyProgress {
            phase: self.phase,
            done: self.done,
            total: self.total,
            current_item,
            errors,
        });
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<(), AppError> {
    if is_cancelled(cancel) {
        return Err(AppError::Cancelled);
    }
    Ok(())
}

fn ensure_in_scope(path: &Path, base: &Path) -> Result<(), AppError> {
    if is_within_scope(&path.to_string_lossy(), &base.to_string_lossy()) {
        Ok(())
    } else {
        Err(AppError::General(format!(
            "{} is outside {}",
            path.display(),
            base.display()
        )))
    }
}

impl PlanApplier {
    pub fn new(index: Arc<dyn FileIndex>) -> Self {
        Self {
            index,
            undo_log: UndoLog::default(),
        }
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo_log
    }

    pub fn clear_undo_log(&mut self) {
        self.undo_log.clear();
    }

    /// Runs the plan phase by phase. Per-item failures are counted in the
    /// report; only cancellation or an unreachable base path return `Err`.
    /// Steps applied before an `Err` stay applied and remain undoable.
    pub fn apply(
        &mut self,
        plan: &Plan,
        sink: &dyn ProgressSink,
        cancel: &AtomicBool,
        simulate: bool,
    ) -> Result<ApplyReport, AppError> {
        let base = plan.base_path.as_path();
        if !base.is_dir() {
            return Err(AppError::BasePathUnreachable(
                base.to_string_lossy().to_string(),
            ));
        }

        let mut report = ApplyReport {
            simulated: simulate,
            ..ApplyReport::default()
        };

        let mut tracker = PhaseTracker::start(
            sink,
            ApplyPhase::CreateDirs,
            plan.create_dirs.len(),
            report.failed,
        );
        for rel in &plan.create_dirs {
            check_cancelled(cancel)?;
            if !simulate {
                match self.create_dir(base, &join_rel(base, rel)) {
                    Ok(created) => report.created_dirs += created,
                    Err(err) => record_failure(&mut report, rel, &err),
                }
            }
            tracker.step(rel, report.failed);
        }

        let mut tracker = PhaseTracker::start(
            sink,
            ApplyPhase::RenameDirs,
            plan.rename_dirs.len(),
            report.failed,
        );
        for rename in &plan.rename_dirs {
            check_cancelled(cancel)?;
            let label = rename.from.to_string_lossy().to_string();
            if !simulate {
                if let Err(err) = self.rename_dir(base, &rename.from, &rename.to) {
                    record_failure(&mut report, &label, &err);
                }
            }
            tracker.step(&label, report.failed);
        }

        let mut tracker = PhaseTracker::start(
            sink,
            ApplyPhase::MoveItems,
            plan.moves.len(),
            report.failed,
        );
        let mut claimed = HashSet::new();
        for planned in &plan.moves {
            check_cancelled(cancel)?;
            let label = planned.source.to_string_lossy().to_string();
            if simulate {
                report.moved += 1;
            } else {
                match self.move_item(base, planned, &mut claimed) {
                    Ok(_) => report.moved += 1,
                    Err(err) => record_failure(&mut report, &label, &err),
                }
            }
            tracker.step(&label, report.failed);
        }

        PhaseTracker::start(sink, ApplyPhase::IndexFinalize, 0, report.failed);
        PhaseTracker::start(sink, ApplyPhase::Done, 0, report.failed);

        tracing::info!(
            simulated = simulate,
            created_dirs = report.created_dirs,
            moved = report.moved,
            failed = report.failed,
            undo_entries = self.undo_log.len(),
            "plan applied"
        );
        Ok(report)
    }

    /// Reverts the whole log newest first; individual failures are skipped.
    pub fn undo_all(&mut self) -> UndoReport {
        let report = undo_service::undo_all(&mut self.undo_log, self.index.as_ref());
        tracing::info!(
            reverted = report.reverted,
            failed = report.failed,
            "undo finished"
        );
        report
    }

    fn create_dir(&mut self, base: &Path, dir: &Path) -> Result<usize, AppError> {
        ensure_in_scope(dir, base)?;
        let created = file_service::create_dir_tracked(dir)?;
        let count = created.len();
        for path in created {
            self.record_history(&path, &path, OperationType::CreateDir, None);
            self.undo_log.push(UndoEntry::CreatedDir { path });
        }
        Ok(count)
    }

    fn rename_dir(&mut self, base: &Path, from: &Path, to: &Path) -> Result<(), AppError> {
        ensure_in_scope(from, base)?;
        ensure_in_scope(to, base)?;
        file_service::rename(from, to)?;
        self.record_history(from, to, OperationType::RenameDir, None);
        self.undo_log.push(UndoEntry::MovedFile {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    /// `claimed` holds the lower-cased destinations taken earlier in this
    /// apply, so names differing only by case stay distinct.
    fn move_item(
        &mut self,
        base: &Path,
        planned: &PlannedMove,
        claimed: &mut HashSet<String>,
    ) -> Result<PathBuf, AppError> {
        ensure_in_scope(&planned.destination, base)?;
        let dest_dir = planned
            .destination
            .parent()
            .ok_or_else(|| {
                AppError::General(format!(
                    "destination has no parent: {}",
                    planned.destination.display()
                ))
            })?
            .to_path_buf();
        let file_name = planned
            .source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                AppError::General(format!("invalid source path: {}", planned.source.display()))
            })?;

        if !dest_dir.is_dir() {
            self.create_dir(base, &dest_dir)?;
        }

        // The disk may have changed since the dry run.
        let destination =
            file_service::available_destination(&dest_dir, &file_name, Some(&planned.source), claimed);
        claimed.insert(file_service::destination_key(&destination));
        if destination == planned.source {
            return Ok(destination);
        }

        let reason = Some(planned.reason.to_string());
        if same_volume(&planned.source, &dest_dir) {
            match file_service::rename(&planned.source, &destination) {
                Ok(()) => {
                    if let Err(err) = self.index.update_path(&planned.source, &destination) {
                        tracing::warn!(error = %err, path = %destination.display(), "index path update failed");
                    }
                    self.record_history(&planned.source, &destination, OperationType::Move, reason);
                    self.undo_log.push(UndoEntry::MovedFile {
                        from: planned.source.clone(),
                        to: destination.clone(),
                    });
                    return Ok(destination);
                }
                Err(AppError::Io(err)) if file_service::is_cross_device(&err) => {
                    tracing::debug!(path = %planned.source.display(), "rename crossed devices, copying");
                }
                Err(err) => return Err(err),
            }
        }

        self.cross_volume_move(&planned.source, &destination, reason)?;
        Ok(destination)
    }

    fn cross_volume_move(
        &mut self,
        source: &Path,
        destination: &Path,
        reason: Option<String>,
    ) -> Result<(), AppError> {
        file_service::copy_file(source, destination)?;
        if let Err(err) = self.index.migrate_suggestion(source, destination) {
            tracing::warn!(error = %err, path = %destination.display(), "index migration failed");
        }
        if let Err(err) = file_service::remove_moved_source(source, destination) {
            if let Err(index_err) = self.index.migrate_suggestion(destination, source) {
                tracing::warn!(error = %index_err, path = %source.display(), "index rollback failed");
            }
            return Err(err);
        }
        self.record_history(source, destination, OperationType::CrossVolumeMove, reason);
        self.undo_log.push(UndoEntry::CopiedFile {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
        Ok(())
    }

    fn record_history(
        &self,
        old_path: &Path,
        new_path: &Path,
        operation: OperationType,
        reason: Option<String>,
    ) {
        let entry = MoveHistoryEntry {
            old_path: old_path.to_string_lossy().to_string(),
            new_path: new_path.to_string_lossy().to_string(),
            operation,
            reason,
            moved_at: None,
        };
        if let Err(err) = self.index.append_move_history(&entry) {
            tracing::warn!(error = %err, "move history not recorded");
        }
    }
}

fn record_failure(report: &mut ApplyReport, item: &str, err: &AppError) {
    tracing::warn!(item, error = %err, "apply step failed");
    report.failed += 1;
    report.errors.push(format!("{item}: {err}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FailingIndex, NullIndex, SqliteIndex};
    use crate::models::plan::{MoveReason, RenameDir};
    use crate::models::progress::NoProgress;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    fn file_set(root: &Path) -> BTreeSet<PathBuf> {
        walkdir::WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| e.into_path())
            .collect()
    }

    fn planned(source: PathBuf, destination: PathBuf) -> PlannedMove {
        PlannedMove {
            source,
            destination,
            rel_path: "Invoices".to_string(),
            reason: MoveReason::Classified,
            confidence: 0.9,
        }
    }

    /// Inbox with `count` files and a plan moving all of them to
    /// `base/Invoices`.
    fn fixture(root: &Path, count: usize) -> Plan {
        let inbox = root.join("inbox");
        let base = root.join("base");
        fs::create_dir_all(&inbox).unwrap();
        fs::create_dir_all(&base).unwrap();
        let moves = (0..count)
            .map(|i| {
                let source = inbox.join(format!("f{i}.txt"));
                fs::write(&source, format!("file {i}")).unwrap();
                planned(source, base.join("Invoices").join(format!("f{i}.txt")))
            })
            .collect();
        Plan {
            base_path: base,
            create_dirs: vec!["Invoices".to_string()],
            moves,
            ..Plan::default()
        }
    }

    #[test]
    fn simulate_touches_nothing_and_reports_every_phase() {
        let dir = tempfile::tempdir().unwrap();
        let plan = fixture(dir.path(), 3);
        let before = file_set(dir.path());

        let phases = Mutex::new(Vec::new());
        let sink = |p: &ApplyProgress| phases.lock().unwrap().push((p.phase, p.done, p.total));
        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        let report = applier
            .apply(&plan, &sink, &AtomicBool::new(false), true)
            .unwrap();

        assert!(report.simulated);
        assert_eq!(report.moved, 3);
        assert_eq!(file_set(dir.path()), before);
        assert!(applier.undo_log().is_empty());

        let phases = phases.into_inner().unwrap();
        assert_eq!(phases.first(), Some(&(ApplyPhase::CreateDirs, 1, 1)));
        assert!(phases.contains(&(ApplyPhase::RenameDirs, 0, 0)));
        assert!(phases.contains(&(ApplyPhase::MoveItems, 3, 3)));
        assert_eq!(phases.last(), Some(&(ApplyPhase::Done, 0, 0)));
    }

    #[test]
    fn apply_then_undo_restores_the_path_set() {
        let dir = tempfile::tempdir().unwrap();
        let plan = fixture(dir.path(), 3);
        let before = file_set(dir.path());

        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        let report = applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();
        assert_eq!(report.moved, 3);
        assert_eq!(report.created_dirs, 1);
        assert!(plan.base_path.join("Invoices").join("f2.txt").exists());
        assert_eq!(applier.undo_log().len(), 4);

        let undo = applier.undo_all();
        assert_eq!(undo.reverted, 4);
        assert_eq!(undo.failed, 0);
        assert_eq!(file_set(dir.path()), before);
    }

    #[test]
    fn cancellation_keeps_completed_moves_and_undo_reverts_them() {
        let dir = tempfile::tempdir().unwrap();
        let plan = fixture(dir.path(), 5);
        let before = file_set(dir.path());

        let cancel = AtomicBool::new(false);
        let sink = |p: &ApplyProgress| {
            if p.phase == ApplyPhase::MoveItems && p.done == 2 {
                cancel.store(true, Ordering::Relaxed);
            }
        };
        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        let result = applier.apply(&plan, &sink, &cancel, false);

        assert!(matches!(result, Err(AppError::Cancelled)));
        let moved: Vec<_> = fs::read_dir(plan.base_path.join("Invoices"))
            .unwrap()
            .collect();
        assert_eq!(moved.len(), 2);

        let undo = applier.undo_all();
        assert_eq!(undo.failed, 0);
        assert_eq!(file_set(dir.path()), before);
    }

    #[test]
    fn item_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = fixture(dir.path(), 3);
        fs::remove_file(&plan.moves[1].source).unwrap();
        plan.moves.push(planned(
            dir.path().join("inbox").join("f0.txt"),
            dir.path().join("elsewhere").join("f0.txt"),
        ));

        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        let report = applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();

        assert_eq!(report.moved, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.errors.len(), 2);
        assert!(!dir.path().join("elsewhere").exists());
    }

    #[test]
    fn destination_taken_after_dry_run_gets_a_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let plan = fixture(dir.path(), 1);
        let invoices = plan.base_path.join("Invoices");
        fs::create_dir_all(&invoices).unwrap();
        fs::write(invoices.join("f0.txt"), b"someone else").unwrap();

        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();

        assert_eq!(fs::read(invoices.join("f0.txt")).unwrap(), b"someone else");
        assert_eq!(fs::read(invoices.join("f0 (1).txt")).unwrap(), b"file 0");
    }

    #[test]
    fn nested_directories_get_one_undo_entry_per_level() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        fs::create_dir_all(&base).unwrap();
        let plan = Plan {
            base_path: base.clone(),
            create_dirs: vec!["Work/Invoices/2024".to_string()],
            ..Plan::default()
        };

        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        let report = applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();
        assert_eq!(report.created_dirs, 3);
        assert_eq!(
            applier.undo_log().entries()[0],
            UndoEntry::CreatedDir {
                path: base.join("Work")
            }
        );

        applier.undo_all();
        assert!(!base.join("Work").exists());
    }

    #[test]
    fn unreachable_base_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let plan = Plan {
            base_path: dir.path().join("missing"),
            ..Plan::default()
        };
        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        let err = applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn moves_update_the_index_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let plan = fixture(dir.path(), 1);
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        index
            .upsert_suggestion(&plan.moves[0].source, "Invoices", 0.9)
            .unwrap();

        let mut applier = PlanApplier::new(index.clone());
        applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();

        let destination = &plan.moves[0].destination;
        assert!(index.get_suggestion(destination).unwrap().is_some());
        assert!(index.get_suggestion(&plan.moves[0].source).unwrap().is_none());
        let history = index.move_history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, OperationType::Move);
        assert_eq!(history[0].reason.as_deref(), Some("classified"));
        assert_eq!(history[1].operation, OperationType::CreateDir);
        assert_eq!(history[1].new_path, plan.base_path.join("Invoices").to_string_lossy().to_string());
    }

    #[test]
    fn index_failures_never_block_apply_or_undo() {
        let dir = tempfile::tempdir().unwrap();
        let plan = fixture(dir.path(), 3);
        let before = file_set(dir.path());
        let index = Arc::new(FailingIndex::default());

        let mut applier = PlanApplier::new(index.clone());
        let report = applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();
        assert_eq!(report.moved, 3);
        assert_eq!(report.failed, 0);

        let copied_from = dir.path().join("loose.txt");
        fs::write(&copied_from, b"loose").unwrap();
        applier
            .cross_volume_move(&copied_from, &plan.base_path.join("loose.txt"), None)
            .unwrap();
        assert!(index.calls.load(Ordering::SeqCst) > 0);

        let undo = applier.undo_all();
        assert_eq!(undo.failed, 0);
        let expected: BTreeSet<PathBuf> = before.into_iter().chain([copied_from]).collect();
        assert_eq!(file_set(dir.path()), expected);
    }

    #[test]
    fn names_differing_only_by_case_stay_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        let invoices = base.join("Invoices");
        fs::create_dir_all(&invoices).unwrap();
        let upper = dir.path().join("a").join("Report.pdf");
        let lower = dir.path().join("b").join("report.pdf");
        for (path, body) in [(&upper, "upper"), (&lower, "lower")] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let plan = Plan {
            base_path: base,
            moves: vec![
                planned(upper, invoices.join("Report.pdf")),
                planned(lower, invoices.join("report (1).pdf")),
            ],
            ..Plan::default()
        };

        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        let report = applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();

        assert_eq!(report.moved, 2);
        assert_eq!(fs::read(invoices.join("Report.pdf")).unwrap(), b"upper");
        assert_eq!(fs::read(invoices.join("report (1).pdf")).unwrap(), b"lower");
    }

    #[test]
    fn copy_move_records_a_copied_entry_and_undoes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("b.txt");
        fs::write(&source, b"payload").unwrap();
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        index.upsert_suggestion(&source, "Docs", 0.7).unwrap();

        let mut applier = PlanApplier::new(index.clone());
        applier
            .cross_volume_move(&source, &destination, None)
            .unwrap();

        assert!(!source.exists());
        assert!(index.get_suggestion(&destination).unwrap().is_some());
        assert!(matches!(
            applier.undo_log().entries()[0],
            UndoEntry::CopiedFile { .. }
        ));

        assert_eq!(applier.undo_all().reverted, 1);
        assert_eq!(fs::read(&source).unwrap(), b"payload");
        assert!(!destination.exists());
        assert!(index.get_suggestion(&source).unwrap().is_some());
    }

    #[test]
    fn rename_dirs_are_applied_and_reversible() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_path_buf();
        fs::create_dir(base.join("Old")).unwrap();
        let plan = Plan {
            base_path: base.clone(),
            rename_dirs: vec![RenameDir {
                from: base.join("Old"),
                to: base.join("New"),
            }],
            ..Plan::default()
        };

        let mut applier = PlanApplier::new(Arc::new(NullIndex));
        applier
            .apply(&plan, &NoProgress, &AtomicBool::new(false), false)
            .unwrap();
        assert!(base.join("New").is_dir());

        applier.undo_all();
        assert!(base.join("Old").is_dir());
        assert!(!base.join("New").exists());
    }
}
