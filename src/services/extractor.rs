use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const DEFAULT_MAX_EXTRACT_BYTES: usize = 16 * 1024;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "yaml", "yml", "toml", "ini", "cfg",
    "conf", "log", "html", "htm", "rtf", "tex", "rs", "py", "js", "ts", "java", "c", "h", "cpp",
    "go", "rb", "sh", "sql",
];

/// Pulls plain text out of a file. Must never fail: any problem yields `""`.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> String;
}

impl<F> Extractor for F
where
    F: Fn(&Path) -> String + Send + Sync,
{
    fn extract(&self, path: &Path) -> String {
        self(path)
    }
}

/// Reads text-like files directly.
pub struct PlainTextExtractor {
    max_bytes: usize,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXTRACT_BYTES)
    }
}

impl PlainTextExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
        }
    }
}

pub fn is_text_candidate(path: &Path) -> bool {
    let Some(ext) = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
    else {
        return false;
    };
    TEXT_EXTENSIONS.contains(&ext.as_str())
        || mime_guess::from_ext(&ext)
            .first()
            .is_some_and(|mime| mime.type_() == mime_guess::mime::TEXT)
}

impl Extractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> String {
        if !is_text_candidate(path) {
            return String::new();
        }
        let Ok(file) = File::open(path) else {
            return String::new();
        };
        // Whitespace collapses during normalization, so read some slack.
        let mut raw = Vec::new();
        let read_cap = (self.max_bytes as u64).saturating_mul(4);
        if file.take(read_cap).read_to_end(&mut raw).is_err() {
            return String::new();
        }
        let normalized = normalize_text(&String::from_utf8_lossy(&raw));
        truncate_utf8(&normalized, self.max_bytes).to_string()
    }
}

/// Unifies line endings, collapses runs of whitespace inside lines and drops
/// blank lines.
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(|line| {
            line.split_whitespace()
                .filter(|token| !token.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .map(|line| line.replace('\0', ""))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a
/// character.
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
