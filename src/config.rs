use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.55;
pub const DEFAULT_MAX_EXTRACT_BYTES: usize = crate::services::extractor::DEFAULT_MAX_EXTRACT_BYTES;
pub const DEFAULT_MAX_INLINE_IMAGE_BYTES: u64 = 4 * 1024 * 1024;
pub const DEFAULT_IMPORT_MAX_DEPTH: usize = 3;

const MIN_EXTRACT_BYTES: usize = 256;
const ENV_PREFIX: &str = "SORTWISE";

/// Engine settings. Every field has a default, so an empty source is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum confidence for a classified (non-fallback) placement.
    pub confidence_threshold: f32,
    pub max_extract_bytes: usize,
    pub max_inline_image_bytes: u64,
    pub include_hidden: bool,
    pub import_max_depth: usize,
    /// SQLite index location; `None` means [`default_index_path`].
    pub index_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_extract_bytes: DEFAULT_MAX_EXTRACT_BYTES,
            max_inline_image_bytes: DEFAULT_MAX_INLINE_IMAGE_BYTES,
            include_hidden: false,
            import_max_depth: DEFAULT_IMPORT_MAX_DEPTH,
            index_path: None,
        }
    }
}

impl EngineConfig {
    pub fn sanitized(mut self) -> Self {
        self.confidence_threshold = if self.confidence_threshold.is_finite() {
            self.confidence_threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE_THRESHOLD
        };
        self.max_extract_bytes = self.max_extract_bytes.max(MIN_EXTRACT_BYTES);
        self.import_max_depth = self.import_max_depth.max(1);
        self
    }

    pub fn resolved_index_path(&self) -> Option<PathBuf> {
        self.index_path.clone().or_else(default_index_path)
    }
}

/// Layers `config/default.toml` (if present), then `config_path`, then
/// `SORTWISE__*` environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<EngineConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let config: EngineConfig = builder.build()?.try_deserialize()?;
    Ok(config.sanitized())
}

pub fn default_index_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sortwise", "sortwise")
        .map(|dirs| dirs.data_dir().join("index.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_share_one_threshold() {
        let config = EngineConfig::default();
        assert_eq!(config.confidence_threshold, 0.55);
        assert_eq!(config.max_extract_bytes, 16 * 1024);
        assert!(!config.include_hidden);
    }

    #[test]
    fn sanitized_clamps_out_of_range_values() {
        let config = EngineConfig {
            confidence_threshold: 3.0,
            max_extract_bytes: 1,
            import_max_depth: 0,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(config.confidence_threshold, 1.0);
        assert_eq!(config.max_extract_bytes, MIN_EXTRACT_BYTES);
        assert_eq!(config.import_max_depth, 1);

        let nan = EngineConfig {
            confidence_threshold: f32::NAN,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(nan.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sortwise.toml");
        std::fs::write(
            &path,
            "confidence_threshold = 0.7\ninclude_hidden = true\nindex_path = \"/tmp/idx.db\"\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.confidence_threshold, 0.7);
        assert!(config.include_hidden);
        assert_eq!(config.index_path, Some(PathBuf::from("/tmp/idx.db")));
        assert_eq!(config.import_max_depth, DEFAULT_IMPORT_MAX_DEPTH);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
    }
}
