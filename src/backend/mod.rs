//! Key-value cache backends.
//!
//! Backends hold opaque bytes with an optional time-to-live. The durable call
//! cache stores its entries in one, and the run context hands one to agents as
//! their completion cache.

pub mod disk;
pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

/// 50 MiB
pub const DEFAULT_SIZE_LIMIT_BYTES: u64 = 50 * 1024 * 1024;

/// Trait for bounded key-value storage with expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a live entry. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store an entry. `ttl` of `None` falls back to the backend's default.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<std::time::Duration>) -> Result<()>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;
}

pub(crate) fn ttl_or_default(ttl: Option<Duration>, default: Option<Duration>) -> Option<Duration> {
    ttl.or(default)
}
