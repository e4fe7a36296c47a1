use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::category::CategoryInfo;
use crate::models::file_entry::FileEntry;

pub const MAX_SUMMARY_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub base_path: PathBuf,
    pub required_rel_path: String,
    pub categories: Vec<CategoryInfo>,
    pub file: FileEntry,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<InlineImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub rel_path: String,
    pub confidence: f32,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl ClassifyResult {
    /// Structurally valid "no opinion" result.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::default()
        }
    }

    pub fn sanitized(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.rel_path = self.rel_path.trim().to_string();
        self.summary = self
            .summary
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(MAX_SUMMARY_CHARS)
            .collect();
        let mut seen = std::collections::HashSet::new();
        self.tags = self
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty() && seen.insert(tag.to_lowercase()))
            .collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_clamps_confidence_and_caps_summary() {
        let result = ClassifyResult {
            rel_path: "  Invoices ".to_string(),
            confidence: 1.7,
            summary: "x".repeat(80),
            tags: vec![" tax ".into(), "Tax".into(), "".into(), "2024".into()],
            reason: String::new(),
        }
        .sanitized();

        assert_eq!(result.rel_path, "Invoices");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.summary.chars().count(), MAX_SUMMARY_CHARS);
        assert_eq!(result.tags, vec!["tax", "2024"]);
    }

    #[test]
    fn sanitized_zeroes_nan_confidence() {
        let result = ClassifyResult {
            confidence: f32::NAN,
            ..ClassifyResult::default()
        }
        .sanitized();
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn fallback_is_blank_with_zero_confidence() {
        let result = ClassifyResult::fallback("no api key");
        assert!(result.rel_path.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.reason, "no api key");
    }
}
