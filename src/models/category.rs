use serde::{Deserialize, Serialize};

pub const REQUIRED_REL_PATH: &str = "Uncategorized";
pub const REQUIRED_DISPLAY: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub rel_path: String,
    pub display: String,
    #[serde(default)]
    pub children: Vec<CategoryNode>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub ext_filter: Option<String>,
    #[serde(default)]
    pub ai_hint: Option<String>,
}

impl CategoryNode {
    pub fn new(rel_path: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            display: display.into(),
            children: Vec::new(),
            is_required: false,
            keywords: Vec::new(),
            ext_filter: None,
            ai_hint: None,
        }
    }

    pub fn required() -> Self {
        Self {
            is_required: true,
            ..Self::new(REQUIRED_REL_PATH, REQUIRED_DISPLAY)
        }
    }

    pub fn info(&self) -> CategoryInfo {
        CategoryInfo {
            rel_path: self.rel_path.clone(),
            display: self.display.clone(),
            keywords: self.keywords.clone(),
            ext_filter: self.ext_filter.clone(),
            ai_hint: self.ai_hint.clone(),
        }
    }

    pub fn record(&self) -> CategoryRecord {
        CategoryRecord {
            rel_path: self.rel_path.clone(),
            display: self.display.clone(),
            keywords: self.keywords.clone(),
            ext_filter: self.ext_filter.clone(),
            ai_hint: self.ai_hint.clone(),
        }
    }
}

/// Lower-cased extensions listed in an extension filter (`"pdf, .Docx"` ->
/// `["pdf", "docx"]`).
pub fn parse_ext_filter(filter: Option<&str>) -> Vec<String> {
    filter
        .unwrap_or_default()
        .split([',', ';', ' '])
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Flat persisted form of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub rel_path: String,
    pub display: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub ext_filter: Option<String>,
    #[serde(default)]
    pub ai_hint: Option<String>,
}

/// What the classifier sees for each category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub rel_path: String,
    pub display: String,
    pub keywords: Vec<String>,
    pub ext_filter: Option<String>,
    pub ai_hint: Option<String>,
}
