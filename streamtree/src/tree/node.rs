//! The arena of tree nodes.
//!
//! Nodes are addressed by stable indices and only ever appended; children
//! lists grow, parents are set once. That makes cycles unconstructible and
//! keeps identifiers valid for the life of the tree.

use std::collections::HashSet;

use crate::completion::CompletionCallback;
use crate::errors::StreamTreeError;
use crate::stage::Stage;

/// Stable identifier of a node within one tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Which sides of a stage its cleanup guard considers active.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GuardConfig {
    /// Downstream consumers still read from this node; a clean native close
    /// must not trigger backward propagation yet.
    pub read_active: bool,
    /// The node's write side is the one whose completion matters.
    pub write_active: bool,
}

/// One stage bound to its position in the composition tree.
pub(crate) struct TreeNode {
    pub stage: Box<dyn Stage>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// First failure observed anywhere in this node's causal closure.
    /// Immutable once set.
    pub error: Option<StreamTreeError>,
    /// Children that have reached a terminal state; grows only.
    pub finished_children: HashSet<NodeId>,
    pub callback: Option<CompletionCallback>,
    pub guard: Option<GuardConfig>,
    /// A watcher task observes the stage's native close signal.
    pub watched: bool,
    /// The stage's resources have been released, natively or forcibly.
    pub released: bool,
    /// Terminal: callback fired and barrier contribution made.
    pub finished: bool,
    /// The node wraps its tree section's reference stage (readable root or
    /// writable terminal); used when deriving guard flags.
    pub origin: bool,
}

impl TreeNode {
    pub fn new(stage: Box<dyn Stage>, parent: Option<NodeId>, origin: bool) -> Self {
        Self {
            stage,
            parent,
            children: Vec::new(),
            error: None,
            finished_children: HashSet::new(),
            callback: None,
            guard: None,
            watched: false,
            released: false,
            finished: false,
            origin,
        }
    }
}

/// Arena owning every node of one tree.
#[derive(Default)]
pub(crate) struct TreeState {
    nodes: Vec<TreeNode>,
}

impl TreeState {
    pub fn insert(&mut self, node: TreeNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.0]
    }

    /// Appends `child` under `parent`; also used to re-root when a writable
    /// tree grows upward.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }
}
