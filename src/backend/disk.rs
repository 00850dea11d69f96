use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{CacheBackend, DEFAULT_SIZE_LIMIT_BYTES, ttl_or_default};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Encoding {
    /// Payload was a compact JSON document and is embedded as-is.
    Json,
    Utf8,
    Base64,
}

/// One cache entry on disk.
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    stored_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    encoding: Encoding,
    value: serde_json::Value,
}

impl DiskEntry {
    fn new(key: &str, bytes: Vec<u8>, ttl: Option<Duration>) -> Self {
        let stored_at = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| stored_at + ttl);

        let (encoding, value) = encode(bytes);
        Self {
            key: key.to_string(),
            stored_at,
            expires_at,
            encoding,
            value,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    fn into_bytes(self) -> Result<Vec<u8>> {
        match (self.encoding, self.value) {
            (Encoding::Json, value) => Ok(serde_json::to_vec(&value)?),
            (Encoding::Utf8, serde_json::Value::String(s)) => Ok(s.into_bytes()),
            (Encoding::Base64, serde_json::Value::String(s)) => Ok(BASE64.decode(s)?),
            (encoding, _) => anyhow::bail!("Corrupt cache entry: {:?} payload is not a string", encoding),
        }
    }
}

fn encode(bytes: Vec<u8>) -> (Encoding, serde_json::Value) {
    // Only embed JSON when it re-serializes to the exact same bytes.
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes)
        && serde_json::to_vec(&value).is_ok_and(|round| round == bytes)
    {
        return (Encoding::Json, value);
    }
    match String::from_utf8(bytes) {
        Ok(s) => (Encoding::Utf8, serde_json::Value::String(s)),
        Err(e) => (
            Encoding::Base64,
            serde_json::Value::String(BASE64.encode(e.into_bytes())),
        ),
    }
}

/// File-based cache backend. Each entry is a JSON file named after the
/// SHA-256 of its key, so reopening the same directory finds prior entries.
///
/// Total size is bounded by `size_limit` bytes. Once exceeded, expired entries
/// are removed first, then the least recently stored ones.
pub struct DiskBackend {
    dir: PathBuf,
    size_limit: u64,
    default_ttl: Option<Duration>,
    lock: RwLock<()>,
}

impl DiskBackend {
    pub fn new(dir: impl AsRef<Path>, size_limit: u64, default_ttl: Option<Duration>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            size_limit,
            default_ttl,
            lock: RwLock::new(()),
        }
    }

    /// Open a backend in a fresh directory under the system temp dir.
    pub fn from_tmpdir(size_limit: u64, default_ttl: Option<Duration>) -> Self {
        let dir = std::env::temp_dir().join(format!("durflow-cache-{}", uuid::Uuid::new_v4()));
        debug!(dir = %dir.display(), "Created temporary cache directory");
        Self::new(dir, size_limit, default_ttl)
    }

    pub fn with_defaults(dir: impl AsRef<Path>) -> Self {
        Self::new(dir, DEFAULT_SIZE_LIMIT_BYTES, None)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Total bytes used by entry files.
    pub async fn volume(&self) -> Result<u64> {
        let _lock = self.lock.read().await;
        Ok(self.scan().await?.iter().map(|(_, size)| size).sum())
    }

    /// Number of entry files, expired ones included until they are evicted.
    pub async fn len(&self) -> Result<usize> {
        let _lock = self.lock.read().await;
        Ok(self.scan().await?.len())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    async fn read_entry(path: &Path) -> Result<Option<DiskEntry>> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read cache entry: {}", path.display())));
            }
        };
        let entry = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse cache entry: {}", path.display()))?;
        Ok(Some(entry))
    }

    async fn write_entry(&self, path: &Path, entry: &DiskEntry) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_string(entry)?;
        tokio::fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Entry files and their sizes.
    async fn scan(&self) -> Result<Vec<(PathBuf, u64)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Ok(meta) = entry.metadata().await
            {
                files.push((path, meta.len()));
            }
        }
        Ok(files)
    }

    /// Evict until the directory fits in `size_limit`. Caller holds the write lock.
    async fn enforce_limit(&self) -> Result<()> {
        let files = self.scan().await?;
        let mut total: u64 = files.iter().map(|(_, size)| size).sum();
        if total <= self.size_limit {
            return Ok(());
        }

        let now = Utc::now();
        let mut live = Vec::new();
        for (path, size) in files {
            match Self::read_entry(&path).await {
                Ok(Some(entry)) if !entry.is_expired(now) => live.push((entry.stored_at, path, size)),
                // Expired or unreadable entries go first.
                _ => {
                    tokio::fs::remove_file(&path).await.ok();
                    total = total.saturating_sub(size);
                }
            }
        }

        live.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, path, size) in live {
            if total <= self.size_limit {
                break;
            }
            debug!(path = %path.display(), "Evicting cache entry over size limit");
            tokio::fs::remove_file(&path).await.ok();
            total = total.saturating_sub(size);
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let entry = {
            let _lock = self.lock.read().await;
            Self::read_entry(&path).await?
        };

        let Some(entry) = entry else {
            return Ok(None);
        };
        if entry.key != key {
            return Ok(None);
        }
        if entry.is_expired(Utc::now()) {
            let _lock = self.lock.write().await;
            // Re-check under the write lock; a writer may have refreshed it.
            if let Some(current) = Self::read_entry(&path).await?
                && current.is_expired(Utc::now())
            {
                tokio::fs::remove_file(&path).await.ok();
            }
            return Ok(None);
        }
        entry.into_bytes().map(Some)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let _lock = self.lock.write().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;

        let entry = DiskEntry::new(key, value, ttl_or_default(ttl, self.default_ttl));
        self.write_entry(&self.entry_path(key), &entry).await?;
        self.enforce_limit().await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let _lock = self.lock.write().await;
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        let _lock = self.lock.write().await;
        for (path, _) in self.scan().await? {
            tokio::fs::remove_file(&path).await.ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_json_is_embedded() {
        let (encoding, value) = encode(br#"{"a":1,"b":[true,null]}"#.to_vec());
        assert_eq!(encoding, Encoding::Json);
        assert_eq!(value, serde_json::json!({"a": 1, "b": [true, null]}));
    }

    #[test]
    fn non_canonical_json_kept_verbatim() {
        let (encoding, value) = encode(b"{ \"a\": 1 }".to_vec());
        assert_eq!(encoding, Encoding::Utf8);
        assert_eq!(value, serde_json::json!("{ \"a\": 1 }"));
    }

    #[test]
    fn binary_payload_base64() {
        let bytes = vec![0xff, 0x00, 0xfe];
        let (encoding, _) = encode(bytes.clone());
        assert_eq!(encoding, Encoding::Base64);

        let entry = DiskEntry::new("k", bytes.clone(), None);
        assert_eq!(entry.into_bytes().unwrap(), bytes);
    }
}
