use std::path::Path;

use serde::{Deserialize, Serialize};

/// Metadata handed to the classifier for a single candidate file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub modified_at: Option<String>,
}

impl FileEntry {
    pub fn from_path(path: &Path) -> Option<Self> {
        let metadata = path.metadata().ok()?;
        if metadata.is_dir() {
            return None;
        }
        let name = path.file_name()?.to_string_lossy().to_string();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        let mime_type = extension
            .as_ref()
            .and_then(|ext| mime_guess::from_ext(ext).first())
            .map(|m| m.to_string());

        Some(Self {
            path: path.to_string_lossy().to_string(),
            name,
            extension,
            mime_type,
            size_bytes: Some(metadata.len() as i64),
            modified_at: metadata
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()),
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("image/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_path_reads_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Scan.PNG");
        std::fs::write(&file, b"12345").unwrap();

        let entry = FileEntry::from_path(&file).unwrap();
        assert_eq!(entry.name, "Scan.PNG");
        assert_eq!(entry.extension.as_deref(), Some("png"));
        assert_eq!(entry.mime_type.as_deref(), Some("image/png"));
        assert_eq!(entry.size_bytes, Some(5));
        assert!(entry.modified_at.is_some());
        assert!(entry.is_image());
    }

    #[test]
    fn from_path_skips_directories_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileEntry::from_path(dir.path()).is_none());
        assert!(FileEntry::from_path(&dir.path().join("missing.txt")).is_none());
    }
}
