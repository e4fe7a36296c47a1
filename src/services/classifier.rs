use crate::models::category::{parse_ext_filter, CategoryInfo};
use crate::models::classify::{ClassifyRequest, ClassifyResult, MAX_SUMMARY_CHARS};

const KEYWORD_WEIGHT: f32 = 0.3;
const EXTENSION_WEIGHT: f32 = 0.3;
const DISPLAY_WEIGHT: f32 = 0.25;
const MIN_LABEL_TOKEN_CHARS: usize = 3;

/// Maps one file onto a category. Implementations must not fail: problems are
/// reported as [`ClassifyResult::fallback`].
pub trait Classifier: Send + Sync {
    fn classify(&self, request: &ClassifyRequest) -> ClassifyResult;
}

impl<F> Classifier for F
where
    F: Fn(&ClassifyRequest) -> ClassifyResult + Send + Sync,
{
    fn classify(&self, request: &ClassifyRequest) -> ClassifyResult {
        self(request)
    }
}

/// Offline classifier scoring keyword, extension and category-name hits
/// against the file name and extracted text.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

fn add_score(score: &mut f32, value: f32) {
    *score = (*score + value).min(1.0);
}

fn label_tokens(label: &str) -> Vec<String> {
    label
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_LABEL_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

struct Scored<'a> {
    category: &'a CategoryInfo,
    score: f32,
    tags: Vec<String>,
}

fn score_category<'a>(
    category: &'a CategoryInfo,
    haystack: &str,
    extension: Option<&str>,
) -> Scored<'a> {
    let mut score = 0.0;
    let mut tags = Vec::new();

    for keyword in &category.keywords {
        let needle = keyword.trim().to_lowercase();
        if !needle.is_empty() && haystack.contains(&needle) {
            add_score(&mut score, KEYWORD_WEIGHT);
            tags.push(needle);
        }
    }

    if let Some(ext) = extension {
        if parse_ext_filter(category.ext_filter.as_deref())
            .iter()
            .any(|allowed| allowed == ext)
        {
            add_score(&mut score, EXTENSION_WEIGHT);
            tags.push(ext.to_string());
        }
    }

    if label_tokens(&category.display)
        .iter()
        .any(|token| haystack.contains(token.as_str()))
    {
        add_score(&mut score, DISPLAY_WEIGHT);
    }

    Scored {
        category,
        score,
        tags,
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, request: &ClassifyRequest) -> ClassifyResult {
        let haystack = format!("{}\n{}", request.file.name, request.text).to_lowercase();
        let extension = request.file.extension.as_deref();
        let required = request.required_rel_path.to_lowercase();

        let best = request
            .categories
            .iter()
            .filter(|category| category.rel_path.to_lowercase() != required)
            .map(|category| score_category(category, &haystack, extension))
            .filter(|scored| scored.score > 0.0)
            .fold(None::<Scored>, |best, candidate| match best {
                Some(current) if current.score >= candidate.score => Some(current),
                _ => Some(candidate),
            });

        let Some(best) = best else {
            return ClassifyResult::fallback("no category matched");
        };

        let summary_source = request
            .text
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or(&request.file.name);

        ClassifyResult {
            rel_path: best.category.rel_path.clone(),
            confidence: best.score,
            summary: summary_source.chars().take(MAX_SUMMARY_CHARS).collect(),
            tags: best.tags,
            reason: format!("matched {}", best.category.display),
        }
        .sanitized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file_entry::FileEntry;
    use std::path::PathBuf;

    fn category(rel: &str, keywords: &[&str], ext: Option<&str>) -> CategoryInfo {
        CategoryInfo {
            rel_path: rel.to_string(),
            display: rel.rsplit('/').next().unwrap_or(rel).to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            ext_filter: ext.map(str::to_string),
            ai_hint: None,
        }
    }

    fn request(name: &str, text: &str, categories: Vec<CategoryInfo>) -> ClassifyRequest {
        let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
        ClassifyRequest {
            base_path: PathBuf::from("/base"),
            required_rel_path: "Uncategorized".to_string(),
            categories,
            file: FileEntry {
                path: format!("/in/{name}"),
                name: name.to_string(),
                extension,
                mime_type: None,
                size_bytes: None,
                modified_at: None,
            },
            text: text.to_string(),
            image: None,
        }
    }

    #[test]
    fn keyword_and_extension_hits_accumulate() {
        let categories = vec![
            category("Uncategorized", &[], None),
            category("Invoices", &["invoice", "total due"], Some("pdf")),
            category("Photos", &["camera"], Some("jpg")),
        ];
        let result = KeywordClassifier.classify(&request(
            "scan.pdf",
            "INVOICE #42\nTotal due: 10 EUR",
            categories,
        ));

        assert_eq!(result.rel_path, "Invoices");
        assert!(result.confidence >= 0.55);
        assert_eq!(result.summary, "INVOICE #42");
        assert!(result.tags.contains(&"invoice".to_string()));
    }

    #[test]
    fn unmatched_files_get_a_blank_fallback() {
        let categories = vec![category("Invoices", &["invoice"], Some("pdf"))];
        let result = KeywordClassifier.classify(&request("song.mp3", "", categories));

        assert!(result.rel_path.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn required_category_is_never_suggested() {
        let categories = vec![category("Uncategorized", &["misc"], None)];
        let result = KeywordClassifier.classify(&request("misc.txt", "misc", categories));
        assert!(result.rel_path.is_empty());
    }

    #[test]
    fn ties_keep_the_first_category() {
        let categories = vec![
            category("Work/Reports", &["report"], None),
            category("School/Reports", &["report"], None),
        ];
        let result = KeywordClassifier.classify(&request("report.txt", "", categories));
        assert_eq!(result.rel_path, "Work/Reports");
    }

    #[test]
    fn closures_are_classifiers() {
        let fixed = |_: &ClassifyRequest| ClassifyResult {
            rel_path: "Invoices".to_string(),
            confidence: 0.9,
            ..ClassifyResult::default()
        };
        let result = fixed.classify(&request("a.pdf", "", Vec::new()));
        assert_eq!(result.rel_path, "Invoices");
    }
}
