//! Run-state tree.
//!
//! Every task or step invocation in a run is a node. Nodes live in a single
//! arena and reference each other by [`NodeId`]; a node's parent owns it
//! through its child list, the parent link is a plain index.
//!
//! The tree also tracks a *current* node. `call_*` moves it down to a new
//! child and the returned [`CallHandle`] moves it back to the parent recorded
//! when the child was opened. Closing several open handles out of order
//! therefore lands on whichever parent the last closed handle recorded, not
//! on the innermost still-open node. Call sites depend on that, so it stays.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Task or step id used when a node is not inside a named task or step.
pub const MAIN_ID: &str = "__main__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Running,
    Suspended,
    Failed,
    Cancelled,
    Completed,
    Terminated,
    TimedOut,
    ContinuedAsNew,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NodeStatus::Running | NodeStatus::Suspended)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Running => "RUNNING",
            NodeStatus::Suspended => "SUSPENDED",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Cancelled => "CANCELLED",
            NodeStatus::Completed => "COMPLETED",
            NodeStatus::Terminated => "TERMINATED",
            NodeStatus::TimedOut => "TIMED_OUT",
            NodeStatus::ContinuedAsNew => "CONTINUED_AS_NEW",
        };
        write!(f, "{}", s)
    }
}

/// Terminal statuses a node can be closed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseStatus {
    Failed,
    Cancelled,
    Completed,
    Terminated,
    TimedOut,
    ContinuedAsNew,
}

impl From<CloseStatus> for NodeStatus {
    fn from(status: CloseStatus) -> Self {
        match status {
            CloseStatus::Failed => NodeStatus::Failed,
            CloseStatus::Cancelled => NodeStatus::Cancelled,
            CloseStatus::Completed => NodeStatus::Completed,
            CloseStatus::Terminated => NodeStatus::Terminated,
            CloseStatus::TimedOut => NodeStatus::TimedOut,
            CloseStatus::ContinuedAsNew => NodeStatus::ContinuedAsNew,
        }
    }
}

/// Position and status of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub task: String,
    pub step: String,
    pub status: NodeStatus,
}

impl NodeInfo {
    fn new(task: &str, step: &str) -> Self {
        Self {
            task: task.to_string(),
            step: step.to_string(),
            status: NodeStatus::Running,
        }
    }

    /// Path identifier, `task/step`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.task, self.step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub info: NodeInfo,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Serializable copy of a tree, stored with each run attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<Node>,
    pub current: NodeId,
}

impl TreeSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Children of `id`, in creation order.
    pub fn children(&self, id: NodeId) -> Vec<&Node> {
        self.node(id)
            .map(|n| n.children.iter().filter_map(|c| self.node(*c)).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct TreeState {
    nodes: Vec<Node>,
    current: NodeId,
}

impl TreeState {
    fn add_child(&mut self, parent: NodeId, task: &str, step: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            info: NodeInfo::new(task, step),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn labels(&self, anchor: NodeId, target: Target<'_>) -> (String, String) {
        match target {
            Target::Task(task) => (task.to_string(), MAIN_ID.to_string()),
            Target::Step(step) => (self.nodes[anchor.0].info.task.clone(), step.to_string()),
            Target::Path(task, step) => (task.to_string(), step.to_string()),
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) enum Target<'a> {
    Task(&'a str),
    Step(&'a str),
    Path(&'a str, &'a str),
}

/// Shared handle to a run's tree. Cloning shares the same tree.
#[derive(Clone)]
pub struct RunTree {
    state: Arc<Mutex<TreeState>>,
}

impl Default for RunTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunTree")
            .field("current", &self.current_node_id())
            .field("nodes", &self.len())
            .finish()
    }
}

impl RunTree {
    /// A tree holding only the root node, `__main__/__main__`, RUNNING.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TreeState {
                nodes: vec![Node {
                    info: NodeInfo::new(MAIN_ID, MAIN_ID),
                    parent: None,
                    children: Vec::new(),
                }],
                current: NodeId::ROOT,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn current(&self) -> NodeId {
        self.lock().current
    }

    pub fn current_info(&self) -> NodeInfo {
        let state = self.lock();
        state.nodes[state.current.0].info.clone()
    }

    /// Path identifier of the current node, e.g. `task_1/__main__`.
    pub fn current_node_id(&self) -> String {
        self.current_info().id()
    }

    pub fn info(&self, id: NodeId) -> Option<NodeInfo> {
        self.lock().nodes.get(id.0).map(|n| n.info.clone())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.lock().nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.lock()
            .nodes
            .get(id.0)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        let state = self.lock();
        TreeSnapshot {
            nodes: state.nodes.clone(),
            current: state.current,
        }
    }

    /// Relabel the current node as `task/__main__`. No node is created.
    pub fn goto_task(&self, task: &str) {
        let mut state = self.lock();
        let current = state.current;
        let info = &mut state.nodes[current.0].info;
        info.task = task.to_string();
        info.step = MAIN_ID.to_string();
    }

    /// Relabel the current node's step. No node is created.
    pub fn goto_step(&self, step: &str) {
        let mut state = self.lock();
        let current = state.current;
        state.nodes[current.0].info.step = step.to_string();
    }

    /// Open a task node under the current node and move into it.
    pub fn call_task(&self, task: &str) -> CallHandle {
        let current = self.current();
        self.call_at(current, Target::Task(task))
    }

    /// Open a step node under the current node and move into it.
    pub fn call_step(&self, step: &str) -> CallHandle {
        let current = self.current();
        self.call_at(current, Target::Step(step))
    }

    /// Add a task node under the current node without moving into it.
    pub fn spawn_task(&self, task: &str) -> CallHandle {
        let current = self.current();
        self.spawn_at(current, Target::Task(task))
    }

    /// Add a step node under the current node without moving into it.
    pub fn spawn_step(&self, step: &str) -> CallHandle {
        let current = self.current();
        self.spawn_at(current, Target::Step(step))
    }

    /// Start a spawn group anchored at the current node.
    pub fn spawn_group(&self) -> SpawnGroup {
        let anchor = self.current();
        SpawnGroup::new(self.clone(), anchor)
    }

    /// Open a node under `parent` and make it current.
    pub(crate) fn call_at(&self, parent: NodeId, target: Target<'_>) -> CallHandle {
        let mut state = self.lock();
        let (task, step) = state.labels(parent, target);
        let node = state.add_child(parent, &task, &step);
        state.current = node;
        CallHandle {
            tree: self.clone(),
            node,
            parent,
            moves_current: true,
        }
    }

    pub(crate) fn spawn_at(&self, anchor: NodeId, target: Target<'_>) -> CallHandle {
        let mut state = self.lock();
        let (task, step) = state.labels(anchor, target);
        let node = state.add_child(anchor, &task, &step);
        CallHandle {
            tree: self.clone(),
            node,
            parent: anchor,
            moves_current: false,
        }
    }

    /// Close the root node when the workflow entrypoint returns.
    pub(crate) fn close_root(&self, status: CloseStatus) {
        self.lock().nodes[0].info.status = status.into();
    }

    fn set_status_if_open(&self, id: NodeId, status: NodeStatus) {
        let mut state = self.lock();
        let info = &mut state.nodes[id.0].info;
        if !info.status.is_terminal() {
            info.status = status;
        }
    }
}

/// Handle returned when a node is opened; closing it records the node's
/// terminal status.
#[derive(Debug)]
pub struct CallHandle {
    tree: RunTree,
    node: NodeId,
    parent: NodeId,
    moves_current: bool,
}

impl CallHandle {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn info(&self) -> NodeInfo {
        // The node is never removed from the arena.
        self.tree
            .info(self.node)
            .unwrap_or_else(|| NodeInfo::new(MAIN_ID, MAIN_ID))
    }

    /// Set the node's status. A handle from `call_*` also moves the current
    /// node back to the parent recorded at open time. Returns that parent.
    pub fn close(self, status: CloseStatus) -> NodeId {
        let mut state = self.tree.lock();
        state.nodes[self.node.0].info.status = status.into();
        if self.moves_current {
            state.current = self.parent;
        }
        self.parent
    }
}

/// Scope for concurrently spawned nodes.
///
/// Nodes spawned through the group hang off the anchor node and leave the
/// current node alone. [`SpawnGroup::complete`] marks every spawned node that
/// is still open COMPLETED. Dropping the group without completing it, as
/// happens when an error is propagated with `?` or a panic unwinds, marks
/// them FAILED instead.
#[derive(Debug)]
pub struct SpawnGroup {
    tree: RunTree,
    anchor: NodeId,
    spawned: Vec<NodeId>,
    finished: bool,
}

impl SpawnGroup {
    pub(crate) fn new(tree: RunTree, anchor: NodeId) -> Self {
        Self {
            tree,
            anchor,
            spawned: Vec::new(),
            finished: false,
        }
    }

    pub fn anchor(&self) -> NodeId {
        self.anchor
    }

    pub fn spawned(&self) -> &[NodeId] {
        &self.spawned
    }

    pub fn spawn_task(&mut self, task: &str) -> CallHandle {
        let handle = self.tree.spawn_at(self.anchor, Target::Task(task));
        self.spawned.push(handle.node());
        handle
    }

    pub fn spawn_step(&mut self, step: &str) -> CallHandle {
        let handle = self.tree.spawn_at(self.anchor, Target::Step(step));
        self.spawned.push(handle.node());
        handle
    }

    /// Normal exit.
    pub fn complete(mut self) {
        self.finish(NodeStatus::Completed);
    }

    /// Failure exit.
    pub fn fail(mut self) {
        self.finish(NodeStatus::Failed);
    }

    /// Exit according to the outcome of the group's body.
    pub fn finish_with<T, E>(self, outcome: &Result<T, E>) {
        match outcome {
            Ok(_) => self.complete(),
            Err(_) => self.fail(),
        }
    }

    fn finish(&mut self, status: NodeStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        for node in &self.spawned {
            self.tree.set_status_if_open(*node, status);
        }
    }
}

impl Drop for SpawnGroup {
    fn drop(&mut self) {
        self.finish(NodeStatus::Failed);
    }
}
