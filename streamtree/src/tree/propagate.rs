//! The propagation engine.
//!
//! Both traversals react to a single node's completion. Forward tears down
//! every descendant of a failed node; backward releases the node itself and
//! walks the completion barrier toward the root. Forward always finishes
//! before backward starts for the same triggering event, so a failed
//! subtree is fully released before any ancestor barrier is examined.
//!
//! Everything here runs under the tree lock; user callbacks are collected
//! during the pass and invoked after the lock is dropped, so a callback may
//! safely re-enter the tree.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::completion::CompletionCallback;
use crate::errors::StreamTreeError;
use crate::tree::guard::release_stage;
use crate::tree::node::{NodeId, TreeState};
use crate::tree::TreeShared;

type PendingCallback = (CompletionCallback, Option<StreamTreeError>);

/// Entry point: a stage's native close signal (or a synthesized one) has
/// been observed for `id`.
pub(crate) fn handle_completion(
    shared: &Arc<TreeShared>,
    id: NodeId,
    err: Option<StreamTreeError>,
) {
    let callbacks = {
        let mut lock = shared.state.lock();
        let state = &mut *lock;
        let mut callbacks = Vec::new();

        let node = state.node_mut(id);
        if node.released {
            trace!(node = %id, "late close signal for released node ignored");
            return;
        }
        if node.error.is_none() {
            node.error = err;
        }
        // The stage closed on its own; its resources are gone.
        node.released = true;

        let error = node.error.clone();
        let read_active = node.guard.is_some_and(|g| g.read_active);
        let write_active = node.guard.is_some_and(|g| g.write_active);
        debug!(node = %id, error = ?error, read_active, write_active, "stage completed");

        if let Some(error) = &error {
            for child in state.node(id).children.clone() {
                propagate_forward(state, child, error, &mut callbacks);
            }
        }
        if error.is_some() || !read_active {
            finish_node(state, id, &mut callbacks);
        }

        callbacks
    };

    for (callback, err) in callbacks {
        callback(err);
    }
}

/// Forward traversal: force-release `id` and everything below it,
/// assigning `error` where no earlier failure was recorded.
fn propagate_forward(
    state: &mut TreeState,
    id: NodeId,
    error: &StreamTreeError,
    callbacks: &mut Vec<PendingCallback>,
) {
    let node = state.node_mut(id);
    if node.error.is_none() {
        node.error = Some(error.clone());
    }
    release_stage(state, id);

    let node = state.node_mut(id);
    if !node.finished {
        node.finished = true;
        if let Some(callback) = node.callback.take() {
            callbacks.push((callback, node.error.clone()));
        }
    }
    trace!(node = %id, "forward teardown");

    for child in state.node(id).children.clone() {
        propagate_forward(state, child, error, callbacks);
    }
}

/// Backward traversal: release `id`, fire its callback, and walk the
/// completion barrier upward.
fn finish_node(state: &mut TreeState, id: NodeId, callbacks: &mut Vec<PendingCallback>) {
    let node = state.node_mut(id);
    if node.finished {
        return;
    }
    node.finished = true;
    release_stage(state, id);

    let node = state.node_mut(id);
    if let Some(callback) = node.callback.take() {
        callbacks.push((callback, node.error.clone()));
    }
    trace!(node = %id, error = ?node.error, "node finished");

    ascend(state, id, callbacks);
}

/// Barrier bookkeeping: record `id` as finished on its parent; once every
/// sibling has finished, the parent finishes too and the walk continues.
fn ascend(state: &mut TreeState, id: NodeId, callbacks: &mut Vec<PendingCallback>) {
    let child_error = state.node(id).error.clone();
    let Some(parent) = state.node(id).parent else {
        return;
    };

    let pnode = state.node_mut(parent);
    if pnode.error.is_none() {
        if let Some(err) = child_error {
            trace!(node = %parent, error = %err, "barrier recorded branch failure");
            pnode.error = Some(err);
        }
    }
    pnode.finished_children.insert(id);
    let finished = pnode.finished_children.len();
    let total = pnode.children.len();
    debug!(node = %parent, finished, total, "barrier update");

    if finished == total {
        finish_node(state, parent, callbacks);
    }
}
