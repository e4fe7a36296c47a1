pub mod category_store;
pub mod category_tree;
pub mod classifier;
pub mod extractor;
pub mod file_service;
pub mod plan_applier;
pub mod plan_builder;
pub mod undo_service;
