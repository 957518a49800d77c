//! Tree construction and lifecycle management.
//!
//! A tree is built by composition operations on [`ReadableTree`] and
//! [`WritableTree`] handles; every operation appends nodes to a shared
//! arena and installs cleanup guards. From then on the propagation engine
//! reacts to stage completions: errors fan out to descendants, completions
//! collapse upward through the sibling barrier, and every stage is released
//! exactly once.

mod guard;
mod handle;
mod node;
mod propagate;

#[cfg(test)]
mod scenarios;

pub use handle::{ReadableTree, WritableTree};

use parking_lot::Mutex;

use crate::stream::DEFAULT_CHANNEL_CAPACITY;
use node::TreeState;

/// Tuning knobs shared by every byte channel a tree creates.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Bound, in chunks, of the channels created by composition operations
    /// (split branches, join multiplexers, finish writers).
    pub channel_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl TreeConfig {
    /// Sets the channel bound.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// State shared by every handle of one tree.
pub(crate) struct TreeShared {
    pub(crate) state: Mutex<TreeState>,
    pub(crate) config: TreeConfig,
}

impl TreeShared {
    pub(crate) fn new(config: TreeConfig) -> Self {
        Self {
            state: Mutex::new(TreeState::default()),
            config,
        }
    }
}
