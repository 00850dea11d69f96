use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::*;
use crate::storage::RunStore;

/// In-memory run store. Holds records only for the lifetime of the store.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunRecord>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn init_run(&self, run_id: &str, workflow_id: &str) -> Result<RunRecord> {
        let record = self
            .lock()
            .entry(run_id.to_string())
            .or_insert_with(|| RunRecord::new(run_id, workflow_id))
            .clone();
        Ok(record)
    }

    async fn upsert_attempt(&self, run_id: &str, attempt: &AttemptRecord) -> Result<()> {
        match self.lock().get_mut(run_id) {
            Some(run) => {
                run.upsert_attempt(attempt.clone());
                Ok(())
            }
            None => anyhow::bail!("Run not found: {}", run_id),
        }
    }

    async fn get_run_info(&self, run_id: &str) -> Result<RunRecord> {
        self.lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))
    }

    async fn find_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.lock().get(run_id).cloned())
    }

    async fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .lock()
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started.cmp(&a.started));
        Ok(runs)
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        self.lock().remove(run_id);
        Ok(())
    }
}
