use crate::error::AppError;
use std::path::{Component, Path};

const PROTECTED_ROOTS: &[&str] = &[
    "/Applications",
    "/bin",
    "/sbin",
    "/usr",
    "/System",
    "/Library",
    "/etc",
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

const INVALID_SEGMENT_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const MAX_SEGMENT_CHARS: usize = 120;
const UNNAMED_SEGMENT: &str = "Unnamed";

/// Refuses empty paths, NUL bytes and `..` components. Character rules for
/// names live in [`segment_issue`].
pub fn validate_path(path: &str) -> Result<(), AppError> {
    if path.is_empty() {
        return Err(AppError::General("path is empty".to_string()));
    }

    if path.contains('\0') {
        return Err(AppError::General("path contains a NUL byte".to_string()));
    }

    let p = Path::new(path);
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(AppError::General(
            "path traversal (.. component) not allowed".to_string(),
        ));
    }

    Ok(())
}

pub fn is_protected_path(path: &str) -> bool {
    let normalized = normalize_path_for_match(path);
    PROTECTED_ROOTS.iter().any(|root| {
        let root_normalized = normalize_path_for_match(root);
        if is_windows_style_path(&root_normalized) {
            let normalized_lower = normalized.to_ascii_lowercase();
            let root_lower = root_normalized.to_ascii_lowercase();
            normalized_lower == root_lower
                || normalized_lower.starts_with(&format!("{root_lower}/"))
        } else {
            normalized == root_normalized || normalized.starts_with(&format!("{root_normalized}/"))
        }
    })
}

fn normalize_path_for_match(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

fn is_windows_style_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

pub fn validate_not_protected(path: &str) -> Result<(), AppError> {
    if is_protected_path(path) {
        return Err(AppError::General(format!(
            "operation on protected path not allowed: {path}"
        )));
    }
    Ok(())
}

/// `CON`, `con.txt` and `Lpt1` are all reserved.
pub fn is_reserved_name(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or(segment).trim();
    RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

/// Describes why `segment` cannot be used as a directory name, if it can't.
pub fn segment_issue(segment: &str) -> Option<String> {
    if segment.is_empty() {
        return Some("empty path segment".to_string());
    }
    if segment == "." || segment == ".." {
        return Some(format!("relative segment '{segment}' not allowed"));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| INVALID_SEGMENT_CHARS.contains(c) || c.is_control())
    {
        return Some(format!("invalid character {bad:?} in '{segment}'"));
    }
    if segment.ends_with('.') || segment.ends_with(' ') {
        return Some(format!("'{segment}' ends with a dot or space"));
    }
    if is_reserved_name(segment) {
        return Some(format!("'{segment}' is a reserved device name"));
    }
    None
}

/// Turns any display name into a usable directory segment.
pub fn safe_name(display: &str) -> String {
    let replaced: String = display
        .chars()
        .map(|c| {
            if INVALID_SEGMENT_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut name: String = collapsed.chars().take(MAX_SEGMENT_CHARS).collect();
    while name.ends_with('.') || name.ends_with(' ') {
        name.pop();
    }
    if name.is_empty() {
        return UNNAMED_SEGMENT.to_string();
    }
    if is_reserved_name(&name) {
        name.push('_');
    }
    name
}
