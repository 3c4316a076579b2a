//! Commit pipeline - Configuration, coordinator and completion handles.

mod config;
mod coordinator;
mod handle;

pub use config::{CommitStrategy, StorageConfig};
pub use coordinator::{CommitCoordinator, CommitTask};
pub use handle::{CommitHandle, CommitInfo};
