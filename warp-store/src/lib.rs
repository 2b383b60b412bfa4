//! Persistent, content-addressed workflow template store with
//! similarity-based retrieval (spec §4.3).

pub mod similarity;
mod store;

pub use store::{FsWorkflowStore, StoreStats, WorkflowStore};
