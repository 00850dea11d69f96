use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use crate::backend::{CacheBackend, ttl_or_default};

/// Default capacity used by `RunConfig::with_in_memory`.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
    last_used: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    tick: u64,
}

/// In-memory time-aware least-recently-used cache.
///
/// Holds at most `max_entries` live entries; inserting past that evicts
/// expired entries first, then the least recently used one.
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    max_entries: usize,
    default_ttl: Option<Duration>,
}

impl MemoryBackend {
    pub fn new(max_entries: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Number of stored entries, expired ones included until they are evicted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(None),
        };
        if expired {
            inner.entries.remove(key);
            return Ok(None);
        }
        Ok(inner.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.value.clone()
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let expires_at = ttl_or_default(ttl, self.default_ttl).map(|ttl| now + ttl);
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                last_used: tick,
            },
        );

        if inner.entries.len() > self.max_entries {
            inner.entries.retain(|_, e| !e.is_expired(now));
        }
        while inner.entries.len() > self.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    inner.entries.remove(&k);
                }
                None => break,
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock().entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.lock().entries.clear();
        Ok(())
    }
}
