//! Error types for the streamtree crate.
//!
//! One error value is shared by every node in a failing subtree: the first
//! failure observed anywhere in a causal closure is copied verbatim to each
//! node it reaches, so the type is cheaply cloneable.

use std::sync::Arc;
use thiserror::Error;

/// The error carried through tree teardown and delivered to completion
/// callbacks.
#[derive(Debug, Clone, Error)]
pub enum StreamTreeError {
    /// A stage reported a failure through its native completion signal.
    #[error("stage failed: {0}")]
    Stage(String),

    /// An I/O failure surfaced by a descriptor-backed stage.
    #[error("I/O failure: {0}")]
    Io(Arc<std::io::Error>),

    /// The consuming side of a byte channel went away before the sequence
    /// completed.
    #[error("pipe closed before completion")]
    BrokenPipe,

    /// The stage was force-released before its own completion signal fired.
    #[error("stage was destroyed")]
    Destroyed,

    /// The stage exposes no close, abort, or destroy capability, so a forced
    /// release could only be synthesized.
    #[error("stage could not be destroyed: no release capability")]
    Unreleasable,
}

impl StreamTreeError {
    /// Creates a native stage failure from any displayable reason.
    #[must_use]
    pub fn stage(reason: impl Into<String>) -> Self {
        Self::Stage(reason.into())
    }
}

impl From<std::io::Error> for StreamTreeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl PartialEq for StreamTreeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Stage(a), Self::Stage(b)) => a == b,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            (Self::BrokenPipe, Self::BrokenPipe)
            | (Self::Destroyed, Self::Destroyed)
            | (Self::Unreleasable, Self::Unreleasable) => true,
            _ => false,
        }
    }
}
