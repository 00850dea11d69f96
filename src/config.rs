//! Run configuration and engine settings.
//!
//! [`RunConfig`] is what a run is executed with: the call caches, the optional
//! agent completion cache, the run store and the step concurrency limit. It
//! is immutable once built and shared behind an `Arc`; passing the same
//! config to `retry_workflow` is what makes the retry consult the same
//! durable cache.
//!
//! [`EngineSettings`] is the on-disk form (`durflow.yaml`) plus environment
//! overrides, turned into a config by [`RunConfig::from_settings`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::backend::memory::DEFAULT_MAX_ENTRIES;
use crate::backend::{CacheBackend, DEFAULT_SIZE_LIMIT_BYTES, DiskBackend, MemoryBackend};
use crate::callcache::{CallCache, CallCacheKind, DurableCallCache, InMemoryCallCache};
use crate::storage::{JsonRunStore, MemoryRunStore, RunStore};

/// Default settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "durflow.yaml";

/// Max concurrent step bodies per run, from `DURFLOW_MAX_CONCURRENT_STEPS`
/// or the number of CPUs.
pub fn default_max_concurrent_steps() -> usize {
    std::env::var("DURFLOW_MAX_CONCURRENT_STEPS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(num_cpus::get)
}

/// Everything a run is executed with.
#[derive(Clone)]
pub struct RunConfig {
    pub step_cache: Arc<dyn CallCache>,
    pub task_cache: Arc<dyn CallCache>,
    pub agent_cache: Option<Arc<dyn CacheBackend>>,
    pub run_store: Arc<dyn RunStore>,
    pub max_concurrent_steps: usize,
    storage_path: Option<PathBuf>,
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("storage_path", &self.storage_path)
            .field("agent_cache", &self.agent_cache.is_some())
            .field("max_concurrent_steps", &self.max_concurrent_steps)
            .finish()
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RunConfig {
    /// In-memory caches and run store, no agent cache.
    pub fn with_defaults() -> Self {
        RunConfigBuilder::new().build()
    }

    /// In-memory everything, including an in-memory agent cache.
    pub fn with_in_memory() -> Self {
        RunConfigBuilder::new()
            .agent_cache(Arc::new(MemoryBackend::new(DEFAULT_MAX_ENTRIES, None)))
            .build()
    }

    /// Durable configuration rooted at `storage_path`:
    ///
    /// - `callcache/steps`, `callcache/tasks`: disk call caches
    /// - `agent_cache`: disk agent completion cache
    /// - `runs`: JSON run store
    pub fn with_disk(
        storage_path: impl AsRef<Path>,
        agent_cache_ttl: Option<Duration>,
        callcache_ttl: Option<Duration>,
    ) -> Self {
        Self::disk_layout(
            storage_path.as_ref(),
            agent_cache_ttl,
            callcache_ttl,
            DEFAULT_SIZE_LIMIT_BYTES,
        )
        .build()
    }

    fn disk_layout(
        root: &Path,
        agent_cache_ttl: Option<Duration>,
        callcache_ttl: Option<Duration>,
        size_limit: u64,
    ) -> RunConfigBuilder {
        let callcache = root.join("callcache");
        RunConfigBuilder::new()
            .step_cache(Arc::new(DurableCallCache::open(
                CallCacheKind::Step,
                callcache.join("steps"),
                callcache_ttl,
                size_limit,
            )))
            .task_cache(Arc::new(DurableCallCache::open(
                CallCacheKind::Task,
                callcache.join("tasks"),
                callcache_ttl,
                size_limit,
            )))
            .agent_cache(Arc::new(DiskBackend::new(
                root.join("agent_cache"),
                size_limit,
                agent_cache_ttl,
            )))
            .run_store(Arc::new(JsonRunStore::new(root.join("runs"))))
            .storage_path(root)
    }

    /// Build a config from loaded settings. Without a storage path the config
    /// is in-memory.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let builder = match &settings.storage_path {
            Some(path) => Self::disk_layout(
                path,
                settings.agent_cache_ttl_s.map(Duration::from_secs),
                settings.callcache_ttl_s.map(Duration::from_secs),
                settings.cache_size_limit_bytes.unwrap_or(DEFAULT_SIZE_LIMIT_BYTES),
            ),
            None => RunConfigBuilder::new(),
        };
        match settings.max_concurrent_steps {
            Some(n) => builder.max_concurrent_steps(n).build(),
            None => builder.build(),
        }
    }

    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::new()
    }

    /// Root directory of a disk configuration.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage_path.as_deref()
    }

    pub fn call_cache(&self, kind: CallCacheKind) -> &Arc<dyn CallCache> {
        match kind {
            CallCacheKind::Step => &self.step_cache,
            CallCacheKind::Task => &self.task_cache,
        }
    }
}

/// Builder for [`RunConfig`]. Anything not set is in-memory.
#[derive(Default)]
pub struct RunConfigBuilder {
    step_cache: Option<Arc<dyn CallCache>>,
    task_cache: Option<Arc<dyn CallCache>>,
    agent_cache: Option<Arc<dyn CacheBackend>>,
    run_store: Option<Arc<dyn RunStore>>,
    max_concurrent_steps: Option<usize>,
    storage_path: Option<PathBuf>,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_cache(mut self, cache: Arc<dyn CallCache>) -> Self {
        self.step_cache = Some(cache);
        self
    }

    pub fn task_cache(mut self, cache: Arc<dyn CallCache>) -> Self {
        self.task_cache = Some(cache);
        self
    }

    pub fn agent_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.agent_cache = Some(cache);
        self
    }

    pub fn run_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.run_store = Some(store);
        self
    }

    /// Values below 1 are raised to 1.
    pub fn max_concurrent_steps(mut self, n: usize) -> Self {
        self.max_concurrent_steps = Some(n.max(1));
        self
    }

    fn storage_path(mut self, path: &Path) -> Self {
        self.storage_path = Some(path.to_path_buf());
        self
    }

    pub fn build(self) -> RunConfig {
        RunConfig {
            step_cache: self
                .step_cache
                .unwrap_or_else(|| Arc::new(InMemoryCallCache::steps())),
            task_cache: self
                .task_cache
                .unwrap_or_else(|| Arc::new(InMemoryCallCache::tasks())),
            agent_cache: self.agent_cache,
            run_store: self
                .run_store
                .unwrap_or_else(|| Arc::new(MemoryRunStore::new())),
            max_concurrent_steps: self
                .max_concurrent_steps
                .unwrap_or_else(default_max_concurrent_steps),
            storage_path: self.storage_path,
        }
    }
}

/// Settings loaded from `durflow.yaml`.
/// All fields are optional; missing fields fall back to env/defaults.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub storage_path: Option<PathBuf>,
    pub callcache_ttl_s: Option<u64>,
    pub agent_cache_ttl_s: Option<u64>,
    pub cache_size_limit_bytes: Option<u64>,
    pub max_concurrent_steps: Option<usize>,
}

impl EngineSettings {
    /// Load settings from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `durflow.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new(DEFAULT_SETTINGS_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        let settings: EngineSettings = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))?;

        Ok(settings)
    }

    /// Apply `DURFLOW_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. Env values win over file values.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup("DURFLOW_STORAGE_PATH").filter(|p| !p.is_empty()) {
            self.storage_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("DURFLOW_MAX_CONCURRENT_STEPS") {
            let n: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid DURFLOW_MAX_CONCURRENT_STEPS: {}", raw))?;
            self.max_concurrent_steps = Some(n);
        }
        Ok(self)
    }
}
