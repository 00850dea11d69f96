//! Call cache: memoized task and step results.
//!
//! An entry is keyed by run id, definition id and the canonical argument
//! string. The run configuration holds one cache for steps and one for tasks,
//! so a step and a task that share an id cannot see each other's results.

pub mod durable;
pub mod memory;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use durable::DurableCallCache;
pub use memory::InMemoryCallCache;

/// Which kind of call a cache memoizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallCacheKind {
    Step,
    Task,
}

impl fmt::Display for CallCacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallCacheKind::Step => write!(f, "step"),
            CallCacheKind::Task => write!(f, "task"),
        }
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult {
    pub found: bool,
    pub result: Option<serde_json::Value>,
}

impl CacheResult {
    pub fn hit(result: serde_json::Value) -> Self {
        Self {
            found: true,
            result: Some(result),
        }
    }

    pub fn miss() -> Self {
        Self {
            found: false,
            result: None,
        }
    }
}

/// Trait for call cache implementations.
#[async_trait]
pub trait CallCache: Send + Sync {
    fn kind(&self) -> CallCacheKind;

    /// Look up the result of a previous call.
    async fn check(&self, run_id: &str, definition_id: &str, serialized_args: &str)
    -> Result<CacheResult>;

    /// Record the result of a completed call.
    async fn store(
        &self,
        run_id: &str,
        definition_id: &str,
        serialized_args: &str,
        result: &serde_json::Value,
    ) -> Result<()>;
}

/// Deterministic cache key.
///
/// The parts are encoded as a JSON array, so no combination of ids and
/// arguments can produce the same key as a different combination.
pub fn cache_key(kind: CallCacheKind, run_id: &str, definition_id: &str, serialized_args: &str) -> String {
    serde_json::json!([kind, run_id, definition_id, serialized_args]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parts_do_not_bleed() {
        let a = cache_key(CallCacheKind::Step, "run-1", "ab", "c");
        let b = cache_key(CallCacheKind::Step, "run-1", "a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn key_includes_kind() {
        assert_ne!(
            cache_key(CallCacheKind::Step, "r", "x", "[]"),
            cache_key(CallCacheKind::Task, "r", "x", "[]")
        );
    }

    #[test]
    fn key_is_stable() {
        assert_eq!(
            cache_key(CallCacheKind::Task, "run-1", "fetch", r#"{"a":1}"#),
            r#"["task","run-1","fetch","{\"a\":1}"]"#
        );
    }
}
