pub mod json_store;
pub mod memory_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::*;
use crate::error::Error;

pub use json_store::JsonRunStore;
pub use memory_store::MemoryRunStore;

/// Check that `run_id` can name a run record.
///
/// Run ids end up as file names, so separators, `..` and control characters
/// are rejected.
pub fn validate_run_id(run_id: &str) -> std::result::Result<(), Error> {
    let reason = if run_id.trim().is_empty() {
        Some("run id is empty")
    } else if run_id.contains(['/', '\\']) {
        Some("run id contains a path separator")
    } else if run_id.contains("..") {
        Some("run id contains '..'")
    } else if run_id.chars().any(char::is_control) {
        Some("run id contains a control character")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidRunId {
            run_id: run_id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Trait for run record persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create the record for a run, or return the existing one if the run was
    /// already started.
    async fn init_run(&self, run_id: &str, workflow_id: &str) -> Result<RunRecord>;

    /// Insert or replace an attempt of a run.
    async fn upsert_attempt(&self, run_id: &str, attempt: &AttemptRecord) -> Result<()>;

    /// Get full run information. Errors if the run is unknown.
    async fn get_run_info(&self, run_id: &str) -> Result<RunRecord>;

    /// Get run information if the run is known.
    async fn find_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// List runs, optionally filtered by status, newest first.
    async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<RunRecord>>;

    /// Delete a run record.
    async fn delete_run(&self, run_id: &str) -> Result<()>;
}
