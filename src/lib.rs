//! Durable workflow execution.
//!
//! Workflows are async functions that call tasks, which call steps. Every
//! task and step result is memoized per run in a call cache; re-running a
//! failed run under the same run id with a durable cache skips the work that
//! already completed.

pub mod agents;
pub mod backend;
pub mod callcache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod marshal;
pub mod registry;
pub mod storage;
pub mod tree;

pub use agents::{Agent, AgentMap, ChatMessage, Completion, CompletionOptions, Role};
pub use backend::{CacheBackend, DiskBackend, MemoryBackend};
pub use callcache::{CacheResult, CallCache, CallCacheKind, DurableCallCache, InMemoryCallCache};
pub use config::{EngineSettings, RunConfig, RunConfigBuilder};
pub use context::{RunContext, RunIdentity};
pub use engine::types::{AttemptRecord, RunRecord, RunStatus};
pub use engine::{WorkflowEngine, WorkflowRunHandle, call_step, call_task};
pub use error::{DefinitionError, Error, ExecutionError, Result, SerializationError};
pub use marshal::CallArgs;
pub use registry::{Definition, DefinitionBuilder, DefinitionKind, Registration, Registry, Step, Task, Workflow};
pub use storage::{JsonRunStore, MemoryRunStore, RunStore};
pub use tree::{CallHandle, CloseStatus, MAIN_ID, Node, NodeId, NodeInfo, NodeStatus, RunTree, SpawnGroup, TreeSnapshot};
