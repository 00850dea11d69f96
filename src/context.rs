//! Run context threaded through every entrypoint.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::agents::{Agent, AgentMap};
use crate::backend::CacheBackend;
use crate::config::RunConfig;
use crate::engine::call;
use crate::error::Result;
use crate::logging::RunLogger;
use crate::registry::{DefinitionKind, Registry, Step, Task};
use crate::tree::{CallHandle, NodeId, NodeInfo, RunTree, SpawnGroup, Target};

/// Ids that identify one attempt of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub workflow_id: String,
    pub run_id: String,
    pub attempt_id: String,
    pub attempt: u32,
}

/// Capabilities and position handed to workflow, task and step bodies.
///
/// Built once per run attempt. Cloning is cheap; every clone shares the same
/// capabilities and tree. Moving into a child node goes through [`fork`],
/// which gives the clone a new position without rebuilding anything else.
///
/// [`fork`]: RunContext::fork
#[derive(Clone)]
pub struct RunContext {
    identity: Arc<RunIdentity>,
    agents: Arc<AgentMap>,
    logger: RunLogger,
    config: Arc<RunConfig>,
    pub(crate) registry: Arc<Registry>,
    tree: RunTree,
    pub(crate) step_permits: Arc<Semaphore>,
    node: NodeId,
    position: DefinitionKind,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("identity", &self.identity)
            .field("node", &self.node)
            .field("position", &self.position)
            .finish()
    }
}

impl RunContext {
    pub(crate) fn new(
        identity: RunIdentity,
        agents: Arc<AgentMap>,
        config: Arc<RunConfig>,
        registry: Arc<Registry>,
        tree: RunTree,
    ) -> Self {
        let logger = RunLogger::new(&identity.workflow_id, &identity.run_id, identity.attempt);
        let step_permits = Arc::new(Semaphore::new(config.max_concurrent_steps.max(1)));
        let node = tree.root();
        Self {
            identity: Arc::new(identity),
            agents,
            logger,
            config,
            registry,
            tree,
            step_permits,
            node,
            position: DefinitionKind::Workflow,
        }
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn run_id(&self) -> &str {
        &self.identity.run_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.identity.workflow_id
    }

    pub fn attempt_id(&self) -> &str {
        &self.identity.attempt_id
    }

    pub fn agents(&self) -> &AgentMap {
        &self.agents
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name)
    }

    /// Agent completion cache, if the run configuration has one.
    pub fn cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.config.agent_cache.as_ref()
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    pub fn run_config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    pub fn tree(&self) -> &RunTree {
        &self.tree
    }

    /// Node this context is bound to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn node_info(&self) -> Option<NodeInfo> {
        self.tree.info(self.node)
    }

    /// Kind of body this context was handed to.
    pub fn position(&self) -> DefinitionKind {
        self.position
    }

    /// Open a child node under this context's node and return a context bound
    /// to it, with the handle that closes it.
    ///
    /// With a step id the child is a step node inside the current task (or
    /// inside `new_task` if given). With only a task id it is a task node.
    /// Without either, the clone stays at this node and no handle is returned.
    pub fn fork(
        &self,
        new_task: Option<&str>,
        new_step: Option<&str>,
    ) -> (RunContext, Option<CallHandle>) {
        let (target, position) = match (new_task, new_step) {
            (Some(task), Some(step)) => (Target::Path(task, step), DefinitionKind::Step),
            (None, Some(step)) => (Target::Step(step), DefinitionKind::Step),
            (Some(task), None) => (Target::Task(task), DefinitionKind::Task),
            (None, None) => return (self.clone(), None),
        };
        let (child, handle) = self.enter(target, position);
        (child, Some(handle))
    }

    pub(crate) fn enter(&self, target: Target<'_>, position: DefinitionKind) -> (RunContext, CallHandle) {
        let handle = self.tree.call_at(self.node, target);
        let mut child = self.clone();
        child.node = handle.node();
        child.position = position;
        (child, handle)
    }

    /// Spawn group anchored at this context's node.
    ///
    /// Call [`SpawnGroup::complete`] on normal exit. A group that is dropped
    /// without it marks its open nodes FAILED, even if the scope returned
    /// normally.
    pub fn spawn_group(&self) -> SpawnGroup {
        SpawnGroup::new(self.tree.clone(), self.node)
    }

    /// Call a step through the call cache. See [`call::call_step`].
    pub fn call_step<A, R>(
        &self,
        step: &Step<A, R>,
        args: A,
    ) -> impl Future<Output = Result<R>> + Send + 'static
    where
        A: Serialize + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        call::call_step(self, step, args)
    }

    /// Call a task through the call cache. See [`call::call_task`].
    pub fn call_task<A, R>(
        &self,
        task: &Task<A, R>,
        args: A,
    ) -> impl Future<Output = Result<R>> + Send + 'static
    where
        A: Serialize + Send + 'static,
        R: Serialize + DeserializeOwned + Send + 'static,
    {
        call::call_task(self, task, args)
    }
}
