//! Per-node cleanup guards.
//!
//! A guard has two jobs: observe the stage's native close signal through a
//! watcher task, and perform at most one forced release when the propagation
//! engine asks for one before that signal arrives. A stage that already
//! finished on its own is never force-released.

use std::sync::Arc;
use tracing::trace;

use crate::errors::StreamTreeError;
use crate::stage::ReleaseStrategy;
use crate::tree::node::{GuardConfig, NodeId, TreeState};
use crate::tree::{propagate, TreeShared};

/// Installs (or refreshes) the guard for `id`.
///
/// The first installation takes the stage's completion listener and spawns
/// the watcher; later calls only update the activity flags.
pub(crate) fn install_guard(
    shared: &Arc<TreeShared>,
    id: NodeId,
    read_active: bool,
    write_active: bool,
) {
    let listener = {
        let mut state = shared.state.lock();
        let node = state.node_mut(id);
        node.guard = Some(GuardConfig {
            read_active,
            write_active,
        });
        trace!(node = %id, read_active, write_active, "guard installed");
        if node.watched {
            None
        } else {
            node.watched = true;
            node.stage.take_completion()
        }
    };

    if let Some(listener) = listener {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let err = listener.await;
            propagate::handle_completion(&shared, id, err);
        });
    }
}

/// Releases the node's stage resources, once, using the most specific
/// capability the stage declared.
///
/// A node whose native close signal was already observed is left alone. A
/// stage with no capability at all gets a synthesized "could not be
/// destroyed" failure recorded as the node's error if it has none.
pub(crate) fn release_stage(state: &mut TreeState, id: NodeId) {
    let node = state.node_mut(id);
    if node.released {
        return;
    }
    node.released = true;
    let strategy = node.stage.release_strategy();
    trace!(node = %id, ?strategy, "forced release");
    match strategy {
        ReleaseStrategy::Close => node.stage.close(),
        ReleaseStrategy::Abort => node.stage.abort(),
        ReleaseStrategy::Destroy => node.stage.destroy(),
        ReleaseStrategy::None => {
            if node.error.is_none() {
                node.error = Some(StreamTreeError::Unreleasable);
            }
        }
    }
}
