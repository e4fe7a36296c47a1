pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod models;
pub mod safety;
pub mod scope_path;
pub mod services;
pub mod state;

pub use commands::workflow::{Workflow, WorkflowStep};
pub use config::{load_config, EngineConfig};
pub use data::{FileIndex, NullIndex, SqliteIndex};
pub use error::AppError;
pub use models::category::{CategoryNode, CategoryRecord};
pub use models::classify::{ClassifyRequest, ClassifyResult};
pub use models::operation::{UndoEntry, UndoLog};
pub use models::plan::{MoveReason, Plan, PlannedMove};
pub use models::progress::{ApplyPhase, ApplyProgress, ApplyReport, ProgressSink, UndoReport};
pub use services::category_tree::CategoryTree;
pub use services::classifier::{Classifier, KeywordClassifier};
pub use services::extractor::{Extractor, PlainTextExtractor};
pub use services::plan_applier::PlanApplier;
pub use services::plan_builder::PlanBuilder;

/// Loads configuration, installs logging and opens an offline workflow.
pub fn run(config_path: Option<&std::path::Path>) -> Result<Workflow, AppError> {
    logging::init();
    let config = load_config(config_path)?;
    tracing::info!(
        threshold = config.confidence_threshold,
        index = ?config.resolved_index_path(),
        "starting sortwise"
    );
    Workflow::offline(config)
}
