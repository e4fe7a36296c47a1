pub mod category;
pub mod classify;
pub mod file_entry;
pub mod operation;
pub mod plan;
pub mod progress;
