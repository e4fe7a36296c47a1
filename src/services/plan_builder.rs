use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::config::EngineConfig;
use crate::data::FileIndex;
use crate::error::AppError;
use crate::models::classify::{ClassifyRequest, ClassifyResult, InlineImage};
use crate::models::file_entry::FileEntry;
use crate::models::plan::{MoveReason, Plan, PlannedMove};
use crate::scope_path::{join_rel, rel_key, stable_key};
use crate::services::category_tree::CategoryTree;
use crate::services::classifier::Classifier;
use crate::services::extractor::{truncate_utf8, Extractor};
use crate::services::file_service::{available_destination, destination_key};
use crate::state::is_cancelled;

const MAX_SNIPPET_CHARS: usize = 200;
const FALLBACK_CONTEXT_ANCESTORS: usize = 2;

/// Confidence exactly at the threshold is accepted.
pub fn accepts(confidence: f32, threshold: f32) -> bool {
    confidence >= threshold
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Flattens files and directories into a de-duplicated file list. Unreadable
/// entries below a target are skipped; a target that cannot be read at all is
/// fatal.
pub fn expand_targets(targets: &[PathBuf], include_hidden: bool) -> Result<Vec<PathBuf>, AppError> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for target in targets {
        let metadata = target.metadata().map_err(|e| AppError::Enumeration {
            path: target.to_string_lossy().to_string(),
            message: e.to_string(),
        })?;

        if metadata.is_file() {
            if seen.insert(stable_key(target)) {
                files.push(target.clone());
            }
            continue;
        }

        let walker = walkdir::WalkDir::new(target)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || include_hidden || !is_hidden(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if seen.insert(stable_key(&path)) {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn clean_label(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '-' | '_' | '.' | '[' | ']' | '(' | ')' | '{' | '}' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classification context used when no text could be extracted: the cleaned
/// file stem followed by the two nearest ancestor folder names.
pub fn fallback_context(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let ancestors = path
        .parent()
        .map(|parent| {
            parent
                .components()
                .rev()
                .filter_map(|component| match component {
                    Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                    _ => None,
                })
                .take(FALLBACK_CONTEXT_ANCESTORS)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    std::iter::once(stem)
        .chain(ancestors)
        .map(|part| clean_label(&part))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn compact_snippet(text: &str) -> Option<String> {
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.is_empty() {
        return None;
    }
    Some(compact.chars().take(MAX_SNIPPET_CHARS).collect())
}

/// Computes plans. Never mutates the filesystem.
pub struct PlanBuilder<'a> {
    classifier: &'a dyn Classifier,
    extractor: &'a dyn Extractor,
    index: &'a dyn FileIndex,
    config: &'a EngineConfig,
}

struct Routing {
    rel_path: String,
    reason: MoveReason,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        classifier: &'a dyn Classifier,
        extractor: &'a dyn Extractor,
        index: &'a dyn FileIndex,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            classifier,
            extractor,
            index,
            config,
        }
    }

    pub fn build_plan(
        &self,
        targets: &[PathBuf],
        tree: &CategoryTree,
        base_path: &Path,
        threshold: f32,
        cancel: &AtomicBool,
    ) -> Result<Plan, AppError> {
        let files = expand_targets(targets, self.config.include_hidden)?;
        tracing::info!(
            files = files.len(),
            base = %base_path.display(),
            threshold,
            "building plan"
        );

        let categories = tree.categories();
        let required_rel = tree.required_rel_path().to_string();
        let mut plan = Plan {
            base_path: base_path.to_path_buf(),
            ..Plan::default()
        };
        plan.stats.total_files = files.len();

        let mut reserved: HashSet<String> = HashSet::new();
        let mut dir_keys: HashSet<String> = HashSet::new();

        for source in &files {
            if is_cancelled(cancel) {
                tracing::info!("dry run cancelled");
                return Err(AppError::Cancelled);
            }

            let Some(file) = FileEntry::from_path(source) else {
                plan.errors
                    .push(format!("{}: not a readable file", source.display()));
                plan.stats.errors += 1;
                continue;
            };

            let text = self.context_text(source);
            let request = ClassifyRequest {
                base_path: base_path.to_path_buf(),
                required_rel_path: required_rel.clone(),
                categories: categories.clone(),
                image: self.inline_image(&file, source),
                file,
                text,
            };
            let result = self.classifier.classify(&request).sanitized();
            let routing = route(tree, &result, threshold);

            match routing.reason {
                MoveReason::Classified => plan.stats.classified += 1,
                MoveReason::Fallback => {
                    plan.stats.fallback += 1;
                    plan.unresolved.push(source.clone());
                    tracing::debug!(
                        path = %source.display(),
                        suggested = %result.rel_path,
                        confidence = result.confidence,
                        "routed to fallback category"
                    );
                }
            }

            self.record_suggestion(source, &routing.rel_path, &result, &request.text);

            let dest_dir = join_rel(base_path, &routing.rel_path);
            let file_name = request.file.name.as_str();
            let destination = available_destination(&dest_dir, file_name, Some(source), &reserved);

            if destination_key(&destination) == destination_key(source) {
                plan.stats.unchanged += 1;
                continue;
            }

            reserved.insert(destination_key(&destination));
            if dir_keys.insert(rel_key(&routing.rel_path)) {
                plan.create_dirs.push(routing.rel_path.clone());
            }
            plan.moves.push(PlannedMove {
                source: source.clone(),
                destination,
                rel_path: routing.rel_path,
                reason: routing.reason,
                confidence: result.confidence,
            });
        }

        plan.stats.moves = plan.moves.len();
        plan.stats.create_dirs = plan.create_dirs.len();
        tracing::info!(
            moves = plan.stats.moves,
            classified = plan.stats.classified,
            fallback = plan.stats.fallback,
            unchanged = plan.stats.unchanged,
            errors = plan.stats.errors,
            "plan built"
        );
        Ok(plan)
    }

    fn context_text(&self, source: &Path) -> String {
        let extracted = self.extractor.extract(source);
        let text = if extracted.trim().is_empty() {
            fallback_context(source)
        } else {
            extracted
        };
        truncate_utf8(&text, self.config.max_extract_bytes).to_string()
    }

    fn inline_image(&self, file: &FileEntry, source: &Path) -> Option<InlineImage> {
        if !file.is_image() {
            return None;
        }
        let size = file.size_bytes.unwrap_or(i64::MAX);
        if size < 0 || size as u64 > self.config.max_inline_image_bytes {
            return None;
        }
        let bytes = std::fs::read(source).ok()?;
        Some(InlineImage {
            mime_type: file.mime_type.clone().unwrap_or_default(),
            bytes,
        })
    }

    fn record_suggestion(&self, source: &Path, rel_path: &str, result: &ClassifyResult, text: &str) {
        if let Err(err) = self
            .index
            .upsert_suggestion(source, rel_path, result.confidence)
        {
            tracing::warn!(error = %err, path = %source.display(), "index suggestion write failed");
            return;
        }
        let snippet = compact_snippet(text);
        if let Err(err) =
            self.index
                .update_summary(source, &result.summary, snippet.as_deref(), &result.tags)
        {
            tracing::warn!(error = %err, path = %source.display(), "index summary write failed");
        }
    }
}

fn route(tree: &CategoryTree, result: &ClassifyResult, threshold: f32) -> Routing {
    let known = tree
        .find(&result.rel_path)
        .filter(|_| accepts(result.confidence, threshold));
    match known {
        Some(node) => Routing {
            rel_path: node.rel_path.clone(),
            reason: MoveReason::Classified,
        },
        None => Routing {
            rel_path: tree.required_rel_path().to_string(),
            reason: MoveReason::Fallback,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FailingIndex, NullIndex, SqliteIndex};
    use std::fs;

    fn fixed(rel: &'static str, confidence: f32) -> impl Fn(&ClassifyRequest) -> ClassifyResult {
        move |_: &ClassifyRequest| ClassifyResult {
            rel_path: rel.to_string(),
            confidence,
            summary: "an invoice".to_string(),
            ..ClassifyResult::default()
        }
    }

    fn no_text(_: &Path) -> String {
        String::new()
    }

    fn invoices_tree() -> CategoryTree {
        let mut tree = CategoryTree::new();
        tree.add_by_rel_path("Invoices", "Invoices").unwrap();
        tree
    }

    fn build(
        classifier: &dyn Classifier,
        targets: &[PathBuf],
        tree: &CategoryTree,
        base: &Path,
        threshold: f32,
    ) -> Plan {
        let config = EngineConfig::default();
        let extractor = no_text;
        PlanBuilder::new(classifier, &extractor, &NullIndex, &config)
            .build_plan(targets, tree, base, threshold, &AtomicBool::new(false))
            .unwrap()
    }

    #[test]
    fn confident_file_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        let file = dir.path().join("inbox").join("scan.pdf");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"%PDF").unwrap();

        let plan = build(&fixed("Invoices", 0.8), &[file.clone()], &invoices_tree(), &base, 0.55);

        assert_eq!(plan.create_dirs, vec!["Invoices"]);
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.moves[0].reason, MoveReason::Classified);
        assert_eq!(plan.moves[0].destination, base.join("Invoices").join("scan.pdf"));
        assert!(plan.unresolved.is_empty());
        assert!(!base.exists());
    }

    #[test]
    fn low_confidence_routes_to_required_category() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        let file = dir.path().join("scan.pdf");
        fs::write(&file, b"%PDF").unwrap();

        let plan = build(&fixed("Invoices", 0.2), &[file.clone()], &invoices_tree(), &base, 0.55);

        assert_eq!(plan.moves[0].reason, MoveReason::Fallback);
        assert_eq!(plan.moves[0].rel_path, "Uncategorized");
        assert_eq!(plan.unresolved, vec![file]);
        assert_eq!(plan.stats.fallback, 1);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.pdf");
        fs::write(&file, b"%PDF").unwrap();
        let tree = invoices_tree();

        let at = build(&fixed("Invoices", 0.55), &[file.clone()], &tree, dir.path(), 0.55);
        assert_eq!(at.moves[0].reason, MoveReason::Classified);

        let below = build(&fixed("Invoices", 0.549), &[file], &tree, dir.path(), 0.55);
        assert_eq!(below.moves[0].reason, MoveReason::Fallback);
    }

    #[test]
    fn unknown_or_blank_category_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.pdf");
        fs::write(&file, b"%PDF").unwrap();
        let tree = invoices_tree();

        let unknown = build(&fixed("Taxes", 0.99), &[file.clone()], &tree, dir.path(), 0.55);
        assert_eq!(unknown.moves[0].reason, MoveReason::Fallback);

        let blank = build(&fixed("  ", 0.99), &[file], &tree, dir.path(), 0.55);
        assert_eq!(blank.moves[0].reason, MoveReason::Fallback);
    }

    #[test]
    fn same_name_files_get_numbered_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        let a = dir.path().join("a").join("report.pdf");
        let b = dir.path().join("b").join("report.pdf");
        let c = dir.path().join("c").join("report.pdf");
        for path in [&a, &b, &c] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"x").unwrap();
        }

        let plan = build(
            &fixed("Invoices", 0.9),
            &[a, b, c],
            &invoices_tree(),
            &base,
            0.55,
        );

        let names: Vec<_> = plan
            .moves
            .iter()
            .map(|m| m.destination.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["report.pdf", "report (1).pdf", "report (2).pdf"]);
        assert_eq!(plan.create_dirs, vec!["Invoices"]);
    }

    #[test]
    fn files_already_in_place_are_not_moved() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Invoices").join("scan.pdf");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"x").unwrap();

        let plan = build(&fixed("invoices", 0.9), &[file], &invoices_tree(), dir.path(), 0.55);

        assert!(plan.moves.is_empty());
        assert!(plan.create_dirs.is_empty());
        assert!(plan.is_empty());
        assert_eq!(plan.stats.unchanged, 1);
    }

    #[test]
    fn empty_extraction_uses_filename_and_folders() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Tax-Docs").join("2024_receipts").join("scan_[final].pdf");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"x").unwrap();

        let seen = std::sync::Mutex::new(String::new());
        let classifier = |request: &ClassifyRequest| {
            *seen.lock().unwrap() = request.text.clone();
            ClassifyResult::fallback("offline")
        };
        build(&classifier, &[file], &invoices_tree(), dir.path(), 0.55);

        assert_eq!(*seen.lock().unwrap(), "scan final 2024 receipts Tax Docs");
    }

    #[test]
    fn small_images_are_attached_inline() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.png");
        fs::write(&file, b"\x89PNG").unwrap();

        let seen = std::sync::Mutex::new(None);
        let classifier = |request: &ClassifyRequest| {
            *seen.lock().unwrap() = request.image.clone();
            ClassifyResult::fallback("offline")
        };
        build(&classifier, &[file], &invoices_tree(), dir.path(), 0.55);

        let image = seen.lock().unwrap().clone().unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, b"\x89PNG");
    }

    #[test]
    fn directory_targets_expand_and_skip_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(inbox.join("nested")).unwrap();
        fs::create_dir_all(inbox.join(".cache")).unwrap();
        fs::write(inbox.join("a.txt"), b"a").unwrap();
        fs::write(inbox.join("nested").join("b.txt"), b"b").unwrap();
        fs::write(inbox.join(".hidden"), b"h").unwrap();
        fs::write(inbox.join(".cache").join("c.txt"), b"c").unwrap();

        let files = expand_targets(&[inbox.clone(), inbox.join("a.txt")], false).unwrap();
        assert_eq!(files, vec![inbox.join("a.txt"), inbox.join("nested").join("b.txt")]);

        let with_hidden = expand_targets(&[inbox], true).unwrap();
        assert_eq!(with_hidden.len(), 4);
    }

    #[test]
    fn missing_target_is_an_enumeration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = expand_targets(&[dir.path().join("missing")], false).unwrap_err();
        assert!(matches!(err, AppError::Enumeration { .. }));
    }

    #[test]
    fn cancellation_stops_the_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.pdf");
        fs::write(&file, b"x").unwrap();
        let config = EngineConfig::default();
        let classifier = fixed("Invoices", 0.9);
        let extractor = no_text;

        let result = PlanBuilder::new(&classifier, &extractor, &NullIndex, &config).build_plan(
            &[file],
            &invoices_tree(),
            dir.path(),
            0.55,
            &AtomicBool::new(true),
        );
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[test]
    fn suggestions_are_recorded_in_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.pdf");
        fs::write(&file, b"x").unwrap();
        let index = SqliteIndex::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let classifier = fixed("Invoices", 0.9);
        let extractor = |_: &Path| "Total due 10 EUR".to_string();

        PlanBuilder::new(&classifier, &extractor, &index, &config)
            .build_plan(
                &[file.clone()],
                &invoices_tree(),
                dir.path(),
                0.55,
                &AtomicBool::new(false),
            )
            .unwrap();

        let record = index.get_suggestion(&file).unwrap().unwrap();
        assert_eq!(record.rel_path, "Invoices");
        assert_eq!(record.summary.as_deref(), Some("an invoice"));
        assert_eq!(record.snippet.as_deref(), Some("Total due 10 EUR"));
    }

    #[test]
    fn failing_index_does_not_change_the_plan() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base");
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        for name in ["a.pdf", "b.pdf"] {
            fs::write(inbox.join(name), b"x").unwrap();
        }
        let config = EngineConfig::default();
        let classifier = fixed("Invoices", 0.9);
        let extractor = |_: &Path| "Total due 10 EUR".to_string();
        let failing = FailingIndex::default();

        let with_failures = PlanBuilder::new(&classifier, &extractor, &failing, &config)
            .build_plan(&[inbox.clone()], &invoices_tree(), &base, 0.55, &AtomicBool::new(false))
            .unwrap();
        let reference = PlanBuilder::new(&classifier, &extractor, &NullIndex, &config)
            .build_plan(&[inbox], &invoices_tree(), &base, 0.55, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(with_failures, reference);
        assert_eq!(with_failures.stats.errors, 0);
        assert!(failing.calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }

    #[test]
    fn fallback_context_cleans_separators() {
        assert_eq!(
            fallback_context(Path::new("/x/My_Projects/[2024]-draft/notes-v2.txt")),
            "notes v2 2024 draft My Projects"
        );
        assert_eq!(fallback_context(Path::new("solo.txt")), "solo");
    }
}
