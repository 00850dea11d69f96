use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::backend::{CacheBackend, DiskBackend};
use crate::callcache::{CacheResult, CallCache, CallCacheKind, cache_key};

/// Call cache over a [`CacheBackend`]. With a [`DiskBackend`] it survives the
/// process, which is what makes `retry_workflow` resume instead of restart.
pub struct DurableCallCache {
    kind: CallCacheKind,
    backend: Arc<dyn CacheBackend>,
    ttl: Option<Duration>,
}

impl DurableCallCache {
    pub fn new(kind: CallCacheKind, backend: Arc<dyn CacheBackend>, ttl: Option<Duration>) -> Self {
        Self { kind, backend, ttl }
    }

    /// Disk-backed cache in `dir`.
    pub fn open(kind: CallCacheKind, dir: impl AsRef<Path>, ttl: Option<Duration>, size_limit: u64) -> Self {
        Self::new(kind, Arc::new(DiskBackend::new(dir, size_limit, None)), ttl)
    }

    /// Disk-backed cache in a fresh temporary directory.
    pub fn from_tmpdir(kind: CallCacheKind, ttl: Option<Duration>, size_limit: u64) -> Self {
        Self::new(kind, Arc::new(DiskBackend::from_tmpdir(size_limit, None)), ttl)
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }
}

#[async_trait]
impl CallCache for DurableCallCache {
    fn kind(&self) -> CallCacheKind {
        self.kind
    }

    async fn check(&self, run_id: &str, definition_id: &str, serialized_args: &str) -> Result<CacheResult> {
        let key = cache_key(self.kind, run_id, definition_id, serialized_args);
        match self.backend.get(&key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt cached result for {} '{}'", self.kind, definition_id))?;
                debug!(kind = %self.kind, id = %definition_id, key = %key, "Cache hit");
                Ok(CacheResult::hit(value))
            }
            None => {
                debug!(kind = %self.kind, id = %definition_id, key = %key, "Cache miss");
                Ok(CacheResult::miss())
            }
        }
    }

    async fn store(
        &self,
        run_id: &str,
        definition_id: &str,
        serialized_args: &str,
        result: &serde_json::Value,
    ) -> Result<()> {
        let key = cache_key(self.kind, run_id, definition_id, serialized_args);
        let bytes = serde_json::to_vec(result)?;
        self.backend.set(&key, bytes, self.ttl).await?;
        debug!(kind = %self.kind, id = %definition_id, key = %key, "Stored result");
        Ok(())
    }
}
