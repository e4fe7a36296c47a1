use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::data::{FileIndex, NullIndex, SqliteIndex};
use crate::error::AppError;
use crate::models::plan::Plan;
use crate::models::progress::{ApplyReport, ProgressSink, UndoReport};
use crate::services::category_store;
use crate::services::category_tree::CategoryTree;
use crate::services::classifier::{Classifier, KeywordClassifier};
use crate::services::extractor::{Extractor, PlainTextExtractor};
use crate::services::plan_applier::PlanApplier;
use crate::services::plan_builder::PlanBuilder;
use crate::state::RunState;

const MAX_AUDIT_ERROR_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    SelectTargets,
    Design,
    DryRunPreview,
    Applying,
    Done,
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelectTargets => write!(f, "select_targets"),
            Self::Design => write!(f, "design"),
            Self::DryRunPreview => write!(f, "dry_run_preview"),
            Self::Applying => write!(f, "applying"),
            Self::Done => write!(f, "done"),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit helpers
// ---------------------------------------------------------------------------

fn summarize_error(error_message: &str, max_chars: usize) -> String {
    let sanitized = error_message.replace(['\n', '\r'], " ");
    let mut iter = sanitized.chars();
    let mut out = String::new();
    for _ in 0..max_chars {
        let Some(ch) = iter.next() else {
            return out;
        };
        out.push(ch);
    }
    if iter.next().is_some() {
        out.push_str("...");
    }
    out
}

pub struct AuditEvent<'a> {
    pub operation: &'a str,
    pub outcome: &'a str,
    pub session_id: &'a str,
    pub item_count: Option<usize>,
    pub failed_count: Option<usize>,
    pub error: Option<&'a AppError>,
}

pub fn build_audit_summary(event: &AuditEvent<'_>) -> String {
    let mut parts = vec![
        format!("operation={}", event.operation),
        format!("outcome={}", event.outcome),
        format!("session={}", event.session_id),
    ];

    if let Some(items) = event.item_count {
        parts.push(format!("items={items}"));
    }
    if let Some(failed) = event.failed_count {
        parts.push(format!("failed={failed}"));
    }
    if let Some(err) = event.error {
        parts.push(format!("error_kind={}", err.kind()));
        parts.push(format!(
            "error={}",
            summarize_error(&err.to_string(), MAX_AUDIT_ERROR_CHARS)
        ));
    }

    parts.join(" ")
}

fn record_audit(event: AuditEvent<'_>) {
    let summary = build_audit_summary(&event);
    match event.error {
        Some(err) if !matches!(err, AppError::Cancelled) => {
            tracing::warn!(target: "sortwise::audit", "{summary}")
        }
        _ => tracing::info!(target: "sortwise::audit", "{summary}"),
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

struct Session {
    id: String,
    step: WorkflowStep,
    base_path: Option<PathBuf>,
    targets: Vec<PathBuf>,
    tree: CategoryTree,
    plan: Option<Arc<Plan>>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            step: WorkflowStep::SelectTargets,
            base_path: None,
            targets: Vec::new(),
            tree: CategoryTree::new(),
            plan: None,
        }
    }

    fn expect_step(&self, allowed: &[WorkflowStep], action: &str) -> Result<(), AppError> {
        if allowed.contains(&self.step) {
            return Ok(());
        }
        Err(AppError::InvalidTransition {
            from: self.step.to_string(),
            action: action.to_string(),
        })
    }
}

/// Drives one classification session: target selection, tree design, dry
/// run, apply and undo. Long-running commands are single-flight; the session
/// lock is never held while one of them runs. The applier lock is only taken
/// by those commands, so accessors never wait on it.
pub struct Workflow {
    config: EngineConfig,
    classifier: Arc<dyn Classifier>,
    extractor: Arc<dyn Extractor>,
    index: Arc<dyn FileIndex>,
    run_state: RunState,
    session: Mutex<Session>,
    applier: Mutex<PlanApplier>,
    undo_len: AtomicUsize,
}

impl Workflow {
    pub fn new(
        config: EngineConfig,
        classifier: Arc<dyn Classifier>,
        extractor: Arc<dyn Extractor>,
        index: Arc<dyn FileIndex>,
    ) -> Self {
        let config = config.sanitized();
        Self {
            applier: Mutex::new(PlanApplier::new(index.clone())),
            config,
            classifier,
            extractor,
            index,
            run_state: RunState::default(),
            session: Mutex::new(Session::new()),
            undo_len: AtomicUsize::new(0),
        }
    }

    /// Keyword classifier, plain-text extractor and the configured SQLite
    /// index (none when no index location can be resolved).
    pub fn offline(config: EngineConfig) -> Result<Self, AppError> {
        let index: Arc<dyn FileIndex> = match config.resolved_index_path() {
            Some(path) => Arc::new(SqliteIndex::open(&path)?),
            None => {
                tracing::warn!("no index location available, suggestions will not be recorded");
                Arc::new(NullIndex)
            }
        };
        let extractor = Arc::new(PlainTextExtractor::new(config.max_extract_bytes));
        Ok(Self::new(config, Arc::new(KeywordClassifier), extractor, index))
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn applier(&self) -> MutexGuard<'_, PlanApplier> {
        self.applier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session_id(&self) -> String {
        self.session().id.clone()
    }

    pub fn step(&self) -> WorkflowStep {
        self.session().step
    }

    pub fn is_busy(&self) -> bool {
        self.run_state.is_busy()
    }

    pub fn tree(&self) -> CategoryTree {
        self.session().tree.clone()
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.session().targets.clone()
    }

    pub fn base_path(&self) -> Option<PathBuf> {
        self.session().base_path.clone()
    }

    pub fn plan(&self) -> Option<Arc<Plan>> {
        self.session().plan.clone()
    }

    /// Undo entries held after the last finished apply, undo or reset.
    pub fn undo_len(&self) -> usize {
        self.undo_len.load(Ordering::Acquire)
    }

    fn publish_undo_len(&self, applier: &PlanApplier) {
        self.undo_len
            .store(applier.undo_log().len(), Ordering::Release);
    }

    pub fn set_base_path(&self, path: &Path) -> Result<(), AppError> {
        self.run_state.ensure_idle()?;
        let mut session = self.session();
        session.expect_step(
            &[WorkflowStep::SelectTargets, WorkflowStep::Design],
            "set_base_path",
        )?;
        if !path.is_dir() {
            return Err(AppError::BasePathUnreachable(
                path.to_string_lossy().to_string(),
            ));
        }
        session.base_path = Some(path.to_path_buf());
        Ok(())
    }

    pub fn select_targets(&self, targets: Vec<PathBuf>) -> Result<(), AppError> {
        self.run_state.ensure_idle()?;
        let mut session = self.session();
        session.expect_step(&[WorkflowStep::SelectTargets], "select_targets")?;
        tracing::debug!(count = targets.len(), "targets selected");
        session.targets = targets;
        Ok(())
    }

    /// On first entry with a base path chosen, seeds the tree from the folders
    /// already under it. A failed import is logged and does not block the
    /// transition.
    pub fn enter_design(&self) -> Result<(), AppError> {
        self.run_state.ensure_idle()?;
        let mut session = self.session();
        session.expect_step(
            &[WorkflowStep::SelectTargets, WorkflowStep::Design],
            "enter_design",
        )?;

        if session.tree.is_only_required() {
            if let Some(base) = session.base_path.clone() {
                match session.tree.import_from_disk(
                    &base,
                    self.config.import_max_depth,
                    self.config.include_hidden,
                ) {
                    Ok(added) => tracing::info!(added, base = %base.display(), "imported folder structure"),
                    Err(err) => tracing::warn!(error = %err, "folder import failed"),
                }
            }
        }
        session.step = WorkflowStep::Design;
        Ok(())
    }

    /// Mutates the category tree. Only allowed while designing.
    pub fn edit_tree<R>(&self, edit: impl FnOnce(&mut CategoryTree) -> R) -> Result<R, AppError> {
        self.run_state.ensure_idle()?;
        let mut session = self.session();
        session.expect_step(&[WorkflowStep::Design], "edit_tree")?;
        Ok(edit(&mut session.tree))
    }

    pub fn load_tree(&self, path: &Path) -> Result<usize, AppError> {
        let records = category_store::load_categories(path)?;
        let count = records.len();
        self.edit_tree(|tree| *tree = CategoryTree::from_records(records))?;
        Ok(count)
    }

    pub fn save_tree(&self, path: &Path) -> Result<(), AppError> {
        let records = self.session().tree.to_records();
        category_store::save_categories(path, &records)
    }

    pub fn dry_run(&self) -> Result<Arc<Plan>, AppError> {
        let _guard = self.run_state.try_begin("dry_run")?;
        let session_id = self.session_id();
        let result = self.run_dry_run();

        match &result {
            Ok(plan) => record_audit(AuditEvent {
                operation: "dry_run",
                outcome: "success",
                session_id: &session_id,
                item_count: Some(plan.moves.len()),
                failed_count: Some(plan.stats.errors),
                error: None,
            }),
            Err(err) => record_audit(AuditEvent {
                operation: "dry_run",
                outcome: "error",
                session_id: &session_id,
                item_count: None,
                failed_count: None,
                error: Some(err),
            }),
        }
        result
    }

    fn run_dry_run(&self) -> Result<Arc<Plan>, AppError> {
        let (tree, targets, base) = {
            let mut session = self.session();
            session.expect_step(&[WorkflowStep::Design], "dry_run")?;
            let base = session
                .base_path
                .clone()
                .ok_or_else(|| AppError::General("no base path selected".to_string()))?;
            let report = session.tree.validate();
            if !report.is_valid() {
                return Err(AppError::Validation(report.messages()));
            }
            session.tree.recompute_rel_paths();
            (session.tree.clone(), session.targets.clone(), base)
        };

        let cancel = self.run_state.cancel_flag();
        let plan = PlanBuilder::new(
            self.classifier.as_ref(),
            self.extractor.as_ref(),
            self.index.as_ref(),
            &self.config,
        )
        .build_plan(
            &targets,
            &tree,
            &base,
            self.config.confidence_threshold,
            &cancel,
        )?;

        if plan.is_empty() {
            tracing::info!(files = plan.stats.total_files, "dry run found nothing to change");
        }
        let plan = Arc::new(plan);
        let mut session = self.session();
        session.plan = Some(plan.clone());
        session.step = WorkflowStep::DryRunPreview;
        Ok(plan)
    }

    pub fn back_to_design(&self) -> Result<(), AppError> {
        self.run_state.ensure_idle()?;
        let mut session = self.session();
        session.expect_step(&[WorkflowStep::DryRunPreview], "back_to_design")?;
        session.plan = None;
        session.step = WorkflowStep::Design;
        Ok(())
    }

    /// Replays the current plan in simulate mode: progress only, no changes.
    pub fn simulate(&self, sink: &dyn ProgressSink) -> Result<ApplyReport, AppError> {
        let _guard = self.run_state.try_begin("simulate")?;
        let plan = self.current_plan("simulate")?;
        let cancel = self.run_state.cancel_flag();
        self.applier().apply(&plan, sink, &cancel, true)
    }

    fn current_plan(&self, action: &str) -> Result<Arc<Plan>, AppError> {
        let session = self.session();
        session.expect_step(&[WorkflowStep::DryRunPreview], action)?;
        session
            .plan
            .clone()
            .ok_or_else(|| AppError::General("no plan to apply".to_string()))
    }

    /// Applies the previewed plan. Success lands in `Done`; cancellation or a
    /// fatal error returns to `Design` with the tree intact and everything
    /// already applied left undoable.
    pub fn apply(&self, sink: &dyn ProgressSink) -> Result<ApplyReport, AppError> {
        let _guard = self.run_state.try_begin("apply")?;
        let plan = self.current_plan("apply")?;
        let session_id = {
            let mut session = self.session();
            session.step = WorkflowStep::Applying;
            session.id.clone()
        };

        let cancel = self.run_state.cancel_flag();
        let result = {
            let mut applier = self.applier();
            let result = applier.apply(&plan, sink, &cancel, false);
            self.publish_undo_len(&applier);
            result
        };

        let mut session = self.session();
        match &result {
            Ok(report) => {
                session.step = WorkflowStep::Done;
                record_audit(AuditEvent {
                    operation: "apply",
                    outcome: "success",
                    session_id: &session_id,
                    item_count: Some(report.moved),
                    failed_count: Some(report.failed),
                    error: None,
                });
            }
            Err(err) => {
                session.step = WorkflowStep::Design;
                session.plan = None;
                record_audit(AuditEvent {
                    operation: "apply",
                    outcome: if matches!(err, AppError::Cancelled) {
                        "cancelled"
                    } else {
                        "error"
                    },
                    session_id: &session_id,
                    item_count: None,
                    failed_count: None,
                    error: Some(err),
                });
            }
        }
        result
    }

    /// Requests cancellation of the running dry run or apply. Returns whether
    /// anything was running.
    pub fn cancel(&self) -> bool {
        self.run_state.mark_cancelled()
    }

    /// Reverts everything the last apply did. From `Done` the session returns
    /// to `Design` since the plan no longer matches the disk.
    pub fn undo_all(&self) -> Result<UndoReport, AppError> {
        let _guard = self.run_state.try_begin("undo_all")?;
        let session_id = {
            let session = self.session();
            session.expect_step(&[WorkflowStep::Done, WorkflowStep::Design], "undo_all")?;
            session.id.clone()
        };

        let report = {
            let mut applier = self.applier();
            let report = applier.undo_all();
            self.publish_undo_len(&applier);
            report
        };

        let mut session = self.session();
        session.step = WorkflowStep::Design;
        session.plan = None;
        record_audit(AuditEvent {
            operation: "undo_all",
            outcome: if report.failed == 0 { "success" } else { "partial" },
            session_id: &session_id,
            item_count: Some(report.reverted),
            failed_count: Some(report.failed),
            error: None,
        });
        Ok(report)
    }

    /// Ends a finished session: plan, targets and undo log are dropped; the
    /// tree and base path carry over.
    pub fn start_over(&self) -> Result<(), AppError> {
        self.run_state.ensure_idle()?;
        let mut session = self.session();
        session.expect_step(&[WorkflowStep::Done], "start_over")?;
        self.applier().clear_undo_log();
        self.undo_len.store(0, Ordering::Release);
        session.plan = None;
        session.targets.clear();
        session.id = uuid::Uuid::new_v4().to_string();
        session.step = WorkflowStep::SelectTargets;
        Ok(())
    }
}
