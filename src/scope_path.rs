use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub fn normalize(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

/// Canonical relPath form: `/` separators, trimmed segments, no empty or `.`
/// segments. Idempotent.
pub fn normalize_rel_path(rel: &str) -> String {
    rel.replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Case-insensitive key used for relPath comparisons.
pub fn rel_key(rel: &str) -> String {
    normalize_rel_path(rel).to_lowercase()
}

pub fn parent_rel(rel: &str) -> Option<&str> {
    rel.rfind('/').map(|idx| &rel[..idx])
}

pub fn join_rel(base: &Path, rel: &str) -> PathBuf {
    normalize_rel_path(rel)
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(base.to_path_buf(), |acc, segment| acc.join(segment))
}

pub fn is_within_scope(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);

    if path == root {
        return true;
    }

    if root == "/" {
        return path.starts_with('/');
    }

    if cfg!(windows) {
        let path_lower = path.to_ascii_lowercase();
        let root_lower = root.to_ascii_lowercase();
        return path_lower.starts_with(&(root_lower + "/"));
    }

    path.starts_with(&(root + "/"))
}

/// Content-independent index key: SHA-256 of the lower-cased normalized path.
pub fn stable_key(path: &Path) -> String {
    let normalized = normalize(&path.to_string_lossy()).to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{digest:x}")
}

#[cfg_attr(not(unix), allow(dead_code))]
fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|candidate| candidate.exists())
}

/// Identifies the volume a path lives on: the drive prefix on Windows, the
/// device id of the nearest existing ancestor elsewhere.
pub fn volume_id(path: &Path) -> Option<String> {
    #[cfg(windows)]
    {
        use std::path::Component;
        match path.components().next() {
            Some(Component::Prefix(prefix)) => Some(
                prefix
                    .as_os_str()
                    .to_string_lossy()
                    .to_ascii_uppercase(),
            ),
            _ => None,
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let existing = nearest_existing(path)?;
        existing
            .metadata()
            .ok()
            .map(|meta| format!("dev:{}", meta.dev()))
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

/// Unknown volumes count as the same; a failed rename still falls back to
/// copy+delete.
pub fn same_volume(a: &Path, b: &Path) -> bool {
    match (volume_id(a), volume_id(b)) {
        (Some(left), Some(right)) => left == right,
        _ => true,
    }
}
