use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    General(String),

    #[error("category tree is invalid: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("operation cancelled")]
    Cancelled,

    #[error("another operation is already running")]
    Busy,

    #[error("base path is unreachable: {0}")]
    BasePathUnreachable(String),

    #[error("cannot enumerate target {path}: {message}")]
    Enumeration { path: String, message: String },

    #[error("'{action}' is not allowed while in {from}")]
    InvalidTransition { from: String, action: String },
}

impl AppError {
    /// Short stable tag used in audit lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(e) => {
                let lower = e.to_string().to_ascii_lowercase();
                if lower.contains("database is locked") || lower.contains("database table is locked")
                {
                    "db_locked"
                } else {
                    "database"
                }
            }
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
            Self::Config(_) => "config",
            Self::General(_) => "other",
            Self::Validation(_) => "validation",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
            Self::BasePathUnreachable(_) | Self::Enumeration { .. } => "fatal",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Fatal errors abort a run; everything else is a per-run or user error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BasePathUnreachable(_) | Self::Enumeration { .. })
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
