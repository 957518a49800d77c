//! The byte-stream collaborator boundary.
//!
//! A [`Stage`] is anything the tree can wrap: it accepts an upstream
//! producer, yields its readable half to a downstream consumer, emits
//! exactly one terminal close signal, and declares which teardown capability
//! a cleanup guard may use against it. The tree never inspects the bytes a
//! stage moves.

pub mod fs;
mod sink;
mod source;
mod transform;

pub use sink::{CollectBuffer, CollectSink, NullSink};
pub use source::{ChunkSource, StreamSource};
pub use transform::MapStage;

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::stream::{byte_channel, ByteStream, ByteWriter, DEFAULT_CHANNEL_CAPACITY};

/// Teardown capability a stage declares when it is wrapped into a tree.
///
/// The cleanup guard executes the declared capability when it must release a
/// stage before the stage's native completion signal arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseStrategy {
    /// Close that also releases the underlying resource. Descriptor-backed
    /// stages declare this; a generic destroy on them can leak descriptors.
    Close,
    /// Abort an in-flight request-like stage. A generic destroy on such a
    /// stage would only half-close it.
    Abort,
    /// Generic destroy.
    #[default]
    Destroy,
    /// No capability. The guard synthesizes completion with an explicit
    /// "could not be destroyed" failure.
    None,
}

/// A byte-stream stage that can be wrapped into a tree.
pub trait Stage: Send + Debug {
    /// Attaches the upstream byte sequence feeding this stage.
    ///
    /// Composition operations never validate compatibility; a stage that
    /// cannot accept input drops the sequence, and the mismatch surfaces
    /// through completion signals once data starts moving.
    fn attach_input(&mut self, input: ByteStream);

    /// Takes the readable half for a downstream consumer.
    ///
    /// Called at most once per stage by the tree. Stages with no readable
    /// half return an already-ended sequence.
    fn take_output(&mut self) -> ByteStream;

    /// Takes the listener for the stage's single terminal close signal, or
    /// `None` when it was already taken.
    fn take_completion(&mut self) -> Option<CompletionListener>;

    /// The teardown capability a cleanup guard should use for a forced
    /// release.
    fn release_strategy(&self) -> ReleaseStrategy {
        ReleaseStrategy::Destroy
    }

    /// Resource-safe close. Required when [`Stage::release_strategy`]
    /// returns [`ReleaseStrategy::Close`].
    fn close(&mut self) {}

    /// Aborts an in-flight request. Required when
    /// [`Stage::release_strategy`] returns [`ReleaseStrategy::Abort`].
    fn abort(&mut self) {}

    /// Generic destroy. The default teardown path.
    fn destroy(&mut self) {}
}

/// A buffering pass-through: forwards its input sequence unchanged through a
/// bounded buffer.
///
/// `join_readable` inserts one of these upstream of a sink so the written
/// sequence can be duplicated before it reaches the sink.
#[derive(Debug)]
pub struct PassThrough {
    writer: Option<ByteWriter>,
    output: Option<ByteStream>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
    stop: Arc<AtomicBool>,
}

impl PassThrough {
    /// Creates a pass-through with the default buffer bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a pass-through buffering at most `capacity` chunks.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (writer, stream) = byte_channel(capacity);
        let (cell, listener) = completion_pair();
        Self {
            writer: Some(writer),
            output: Some(stream.instrumented(cell.clone())),
            cell,
            listener: Some(listener),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for PassThrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for PassThrough {
    fn attach_input(&mut self, input: ByteStream) {
        if let Some(writer) = self.writer.take() {
            tokio::spawn(pump(input, writer, Arc::clone(&self.stop)));
        }
    }

    fn take_output(&mut self) -> ByteStream {
        self.output.take().unwrap_or_else(ByteStream::empty)
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn destroy(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.writer = None;
        self.output = None;
        self.cell.complete(Some(crate::errors::StreamTreeError::Destroyed));
    }
}

/// Forwards a sequence into a writer until the sequence terminates, the
/// receiver goes away, or the stage is destroyed.
pub(crate) async fn pump(mut input: ByteStream, writer: ByteWriter, stop: Arc<AtomicBool>) {
    while let Some(item) = input.next().await {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let terminal = item.is_err();
        if writer.send_item(item).await.is_err() {
            return;
        }
        if terminal {
            return;
        }
    }
}
