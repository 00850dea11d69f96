use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::*;
use crate::storage::{RunStore, validate_run_id};

/// File-based run store. Each run is stored as a separate JSON file.
pub struct JsonRunStore {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonRunStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn run_path(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.base_dir.join(format!("{}.json", run_id)))
    }

    async fn read_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let path = self.run_path(run_id)?;
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read run file: {}", path.display())));
            }
        };
        let record: RunRecord =
            serde_json::from_str(&data).with_context(|| format!("Failed to parse run: {}", run_id))?;
        Ok(Some(record))
    }

    async fn write_run(&self, record: &RunRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("Failed to create run dir: {}", self.base_dir.display()))?;

        let path = self.run_path(&record.run_id)?;
        let tmp_path = path.with_extension("json.tmp");

        let data = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(())
    }
}

#[async_trait]
impl RunStore for JsonRunStore {
    async fn init_run(&self, run_id: &str, workflow_id: &str) -> Result<RunRecord> {
        let _lock = self.lock.write().await;
        if let Some(existing) = self.read_run(run_id).await? {
            return Ok(existing);
        }
        let record = RunRecord::new(run_id, workflow_id);
        self.write_run(&record).await?;
        Ok(record)
    }

    async fn upsert_attempt(&self, run_id: &str, attempt: &AttemptRecord) -> Result<()> {
        let _lock = self.lock.write().await;
        let mut record = self
            .read_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))?;
        record.upsert_attempt(attempt.clone());
        self.write_run(&record).await
    }

    async fn get_run_info(&self, run_id: &str) -> Result<RunRecord> {
        let _lock = self.lock.read().await;
        self.read_run(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Run not found: {}", run_id))
    }

    async fn find_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let _lock = self.lock.read().await;
        self.read_run(run_id).await
    }

    async fn list_runs(&self, status_filter: Option<RunStatus>) -> Result<Vec<RunRecord>> {
        let _lock = self.lock.read().await;

        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Ok(data) = tokio::fs::read_to_string(&path).await
                && let Ok(record) = serde_json::from_str::<RunRecord>(&data)
            {
                if let Some(filter) = status_filter
                    && record.status != filter
                {
                    continue;
                }
                runs.push(record);
            }
        }

        // Newest first
        runs.sort_by(|a, b| b.started.cmp(&a.started));

        Ok(runs)
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id)?;
        let _lock = self.lock.write().await;
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
