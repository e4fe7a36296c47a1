use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;

use crate::error::AppError;
use crate::models::category::{CategoryInfo, CategoryNode, CategoryRecord};
use crate::safety::{safe_name, segment_issue};
use crate::scope_path::{normalize_rel_path, parent_rel, rel_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub rel_path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    /// Each set holds relPaths that collide case-insensitively.
    pub duplicates: Vec<Vec<String>>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty() && self.duplicates.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .issues
            .iter()
            .map(|issue| format!("{}: {}", display_rel(&issue.rel_path), issue.message))
            .collect();
        out.extend(
            self.duplicates
                .iter()
                .map(|set| format!("duplicate relPath: {}", set.join(", "))),
        );
        out
    }
}

fn display_rel(rel: &str) -> &str {
    if rel.is_empty() {
        "<empty>"
    } else {
        rel
    }
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// User-authored category hierarchy under a virtual root. Always holds exactly
/// one required node at the top level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTree {
    root: CategoryNode,
}

impl Default for CategoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryTree {
    pub fn new() -> Self {
        let mut root = CategoryNode::new("", "");
        root.children.push(CategoryNode::required());
        Self { root }
    }

    pub fn required(&self) -> &CategoryNode {
        self.root
            .children
            .iter()
            .find(|child| child.is_required)
            .unwrap_or(&self.root)
    }

    pub fn required_rel_path(&self) -> &str {
        &self.required().rel_path
    }

    pub fn is_only_required(&self) -> bool {
        self.root.children.iter().all(|child| child.is_required)
    }

    fn is_required_key(&self, key: &str) -> bool {
        rel_key(self.required_rel_path()) == key
    }

    pub fn find(&self, rel_path: &str) -> Option<&CategoryNode> {
        let key = rel_key(rel_path);
        if key.is_empty() {
            return None;
        }
        find_in(&self.root, &key)
    }

    fn find_mut(&mut self, rel_path: &str) -> Option<&mut CategoryNode> {
        let key = rel_key(rel_path);
        if key.is_empty() {
            return None;
        }
        find_in_mut(&mut self.root, &key)
    }

    pub fn add_by_rel_path(&mut self, rel_path: &str, display: &str) -> Result<(), AppError> {
        self.add(CategoryRecord {
            rel_path: rel_path.to_string(),
            display: display.to_string(),
            keywords: Vec::new(),
            ext_filter: None,
            ai_hint: None,
        })
    }

    /// Adds (or updates) the node at `record.rel_path`, creating missing
    /// intermediate nodes named after their path segment. On an existing node
    /// only the metadata present in `record` is replaced.
    pub fn add(&mut self, record: CategoryRecord) -> Result<(), AppError> {
        let rel = normalize_rel_path(&record.rel_path);
        if rel.is_empty() {
            return Err(AppError::Validation(vec![
                "cannot add a category with an empty relPath".to_string(),
            ]));
        }

        let required_key = rel_key(self.required_rel_path());
        let key = rel.to_lowercase();
        if key.starts_with(&format!("{required_key}/")) {
            return Err(AppError::Validation(vec![format!(
                "{rel}: the required category cannot have children"
            )]));
        }

        let mut node = &mut self.root;
        let mut prefix = String::new();
        for segment in rel.split('/') {
            prefix = join_rel(&prefix, segment);
            let prefix_key = prefix.to_lowercase();
            let idx = match node
                .children
                .iter()
                .position(|child| child.rel_path.to_lowercase() == prefix_key)
            {
                Some(idx) => idx,
                None => {
                    node.children.push(CategoryNode::new(prefix.clone(), segment));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[idx];
        }

        if !record.display.trim().is_empty() && !node.is_required {
            node.display = record.display.trim().to_string();
        }
        let keywords: Vec<String> = record
            .keywords
            .into_iter()
            .map(|keyword| keyword.trim().to_string())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        if !keywords.is_empty() {
            node.keywords = keywords;
        }
        if let Some(ext_filter) = record.ext_filter.filter(|f| !f.trim().is_empty()) {
            node.ext_filter = Some(ext_filter);
        }
        if let Some(ai_hint) = record.ai_hint.filter(|h| !h.trim().is_empty()) {
            node.ai_hint = Some(ai_hint);
        }
        Ok(())
    }

    /// Removes the node and its subtree. Never removes the required node.
    pub fn remove_by_rel_path(&mut self, rel_path: &str) -> bool {
        let key = rel_key(rel_path);
        if key.is_empty() || self.is_required_key(&key) {
            return false;
        }
        detach(&mut self.root, &key).is_some()
    }

    pub fn rename(&mut self, rel_path: &str, display: &str) -> bool {
        let display = display.trim();
        if display.is_empty() {
            return false;
        }
        let Some(node) = self.find_mut(rel_path) else {
            return false;
        };
        if node.is_required {
            return false;
        }
        node.display = display.to_string();
        self.recompute_rel_paths();
        true
    }

    /// Re-parents a node; `new_parent` of `""` means the top level.
    pub fn move_to(&mut self, rel_path: &str, new_parent: &str) -> bool {
        let key = rel_key(rel_path);
        let parent_key = rel_key(new_parent);
        if key.is_empty() || self.is_required_key(&key) || self.is_required_key(&parent_key) {
            return false;
        }
        if parent_key == key || parent_key.starts_with(&format!("{key}/")) {
            return false;
        }
        if !parent_key.is_empty() && self.find(new_parent).is_none() {
            return false;
        }
        if parent_rel(&key).unwrap_or("") == parent_key {
            return self.find(rel_path).is_some();
        }

        let Some(node) = detach(&mut self.root, &key) else {
            return false;
        };
        if parent_key.is_empty() {
            self.root.children.push(node);
        } else if let Some(parent) = find_in_mut(&mut self.root, &parent_key) {
            parent.children.push(node);
        } else {
            self.root.children.push(node);
        }
        self.recompute_rel_paths();
        true
    }

    /// Regenerates every non-required relPath from the display chain,
    /// suffixing `_1`, `_2`, ... on sibling collisions.
    pub fn recompute_rel_paths(&mut self) {
        recompute_children("", &mut self.root.children);
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        let required_key = rel_key(self.required_rel_path());
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for node in self.nodes() {
            if node.is_required {
                continue;
            }
            let rel = &node.rel_path;
            if rel.trim().is_empty() {
                report.issues.push(ValidationIssue {
                    rel_path: rel.clone(),
                    message: format!("category '{}' has an empty relPath", node.display),
                });
                continue;
            }
            if normalize_rel_path(rel) != *rel {
                report.issues.push(ValidationIssue {
                    rel_path: rel.clone(),
                    message: "relPath is not normalized".to_string(),
                });
            }
            for segment in rel.split('/') {
                if let Some(message) = segment_issue(segment) {
                    report.issues.push(ValidationIssue {
                        rel_path: rel.clone(),
                        message,
                    });
                }
            }
            if rel.to_lowercase() == required_key {
                report.issues.push(ValidationIssue {
                    rel_path: rel.clone(),
                    message: "collides with the required category".to_string(),
                });
            }
            groups.entry(rel.to_lowercase()).or_default().push(rel.clone());
        }

        report.duplicates = groups
            .into_values()
            .filter(|set| set.len() > 1)
            .collect();
        report
    }

    /// All nodes below the virtual root, root-first.
    pub fn nodes(&self) -> Vec<&CategoryNode> {
        let mut out = Vec::new();
        collect_nodes(&self.root.children, &mut out);
        out
    }

    pub fn categories(&self) -> Vec<CategoryInfo> {
        self.nodes().into_iter().map(CategoryNode::info).collect()
    }

    pub fn to_records(&self) -> Vec<CategoryRecord> {
        self.nodes().into_iter().map(CategoryNode::record).collect()
    }

    pub fn from_records(records: Vec<CategoryRecord>) -> Self {
        let mut tree = Self::new();
        for record in records {
            let rel = record.rel_path.clone();
            if let Err(e) = tree.add(record) {
                tracing::warn!(rel_path = %rel, error = %e, "skipping category record");
            }
        }
        tree
    }

    /// Seeds the tree from directories already present under `base`.
    /// Returns the number of nodes added.
    pub fn import_from_disk(
        &mut self,
        base: &Path,
        max_depth: usize,
        include_hidden: bool,
    ) -> Result<usize, AppError> {
        if !base.is_dir() {
            return Err(AppError::BasePathUnreachable(
                base.to_string_lossy().to_string(),
            ));
        }

        let required_key = rel_key(self.required_rel_path());
        let mut added = 0usize;
        let walker = walkdir::WalkDir::new(base)
            .min_depth(1)
            .max_depth(max_depth.max(1))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || include_hidden
                    || !entry.file_name().to_string_lossy().starts_with('.')
            });

        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(base) else {
                continue;
            };
            let segments: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            if segments.iter().any(|segment| segment_issue(segment).is_some()) {
                tracing::debug!(path = %entry.path().display(), "skipping folder with unusable name");
                continue;
            }
            let rel = segments.join("/");
            let key = rel.to_lowercase();
            if key == required_key || key.starts_with(&format!("{required_key}/")) {
                continue;
            }
            if self.find(&rel).is_some() {
                continue;
            }
            let display = segments.last().cloned().unwrap_or_default();
            self.add_by_rel_path(&rel, &display)?;
            added += 1;
        }

        tracing::info!(base = %base.display(), added, "imported folder structure");
        Ok(added)
    }
}

fn find_in<'a>(node: &'a CategoryNode, key: &str) -> Option<&'a CategoryNode> {
    for child in &node.children {
        let child_key = child.rel_path.to_lowercase();
        if child_key == key {
            return Some(child);
        }
        if key.starts_with(&format!("{child_key}/")) {
            if let Some(found) = find_in(child, key) {
                return Some(found);
            }
        }
    }
    None
}

fn find_in_mut<'a>(node: &'a mut CategoryNode, key: &str) -> Option<&'a mut CategoryNode> {
    let idx = node.children.iter().position(|child| {
        let child_key = child.rel_path.to_lowercase();
        child_key == key || key.starts_with(&format!("{child_key}/"))
    })?;
    let child = &mut node.children[idx];
    if child.rel_path.to_lowercase() == key {
        Some(child)
    } else {
        find_in_mut(child, key)
    }
}

fn detach(node: &mut CategoryNode, key: &str) -> Option<CategoryNode> {
    if let Some(idx) = node
        .children
        .iter()
        .position(|child| child.rel_path.to_lowercase() == key)
    {
        return Some(node.children.remove(idx));
    }
    node.children
        .iter_mut()
        .find_map(|child| detach(child, key))
}

fn collect_nodes<'a>(children: &'a [CategoryNode], out: &mut Vec<&'a CategoryNode>) {
    for child in children {
        out.push(child);
        collect_nodes(&child.children, out);
    }
}

fn recompute_children(parent: &str, children: &mut [CategoryNode]) {
    let mut used: HashSet<String> = children
        .iter()
        .filter(|child| child.is_required)
        .map(|child| child.rel_path.to_lowercase())
        .collect();

    for child in children.iter_mut() {
        if child.is_required {
            continue;
        }
        let base = safe_name(&child.display);
        let mut candidate = join_rel(parent, &base);
        let mut suffix = 1usize;
        while !used.insert(candidate.to_lowercase()) {
            candidate = join_rel(parent, &format!("{base}_{suffix}"));
            suffix += 1;
        }
        child.rel_path = candidate;
        let rel = child.rel_path.clone();
        recompute_children(&rel, &mut child.children);
    }
}

impl CategoryTree {
    #[cfg(test)]
    pub(crate) fn required_count(&self) -> usize {
        self.nodes().iter().filter(|node| node.is_required).count()
    }
}
