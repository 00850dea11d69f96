use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::callcache::{CacheResult, CallCache, CallCacheKind, cache_key};

/// Process-memory call cache. Entries live as long as the cache instance.
pub struct InMemoryCallCache {
    kind: CallCacheKind,
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryCallCache {
    pub fn new(kind: CallCacheKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn steps() -> Self {
        Self::new(CallCacheKind::Step)
    }

    pub fn tasks() -> Self {
        Self::new(CallCacheKind::Task)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CallCache for InMemoryCallCache {
    fn kind(&self) -> CallCacheKind {
        self.kind
    }

    async fn check(&self, run_id: &str, definition_id: &str, serialized_args: &str) -> Result<CacheResult> {
        let key = cache_key(self.kind, run_id, definition_id, serialized_args);
        match self.lock().get(&key) {
            Some(value) => {
                debug!(kind = %self.kind, id = %definition_id, "Cache hit");
                Ok(CacheResult::hit(value.clone()))
            }
            None => {
                debug!(kind = %self.kind, id = %definition_id, "Cache miss");
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
        self.lock().insert(key, result.clone());
        debug!(kind = %self.kind, id = %definition_id, "Stored result");
        Ok(())
    }
}
