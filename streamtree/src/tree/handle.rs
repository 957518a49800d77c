//! Composition operations on tree handles.
//!
//! Handles are consumed by composition calls, so a live handle always
//! denotes a leaf position (readable trees) or the root-most position
//! (writable trees). That, plus the append-only arena, is what rules out
//! cycles and double-wiring without any runtime validation: none of these
//! operations can fail at this layer, and stream-level mismatches surface
//! later through cleanup guards.

use std::sync::Arc;
use tracing::debug;

use crate::completion::CompletionCallback;
use crate::errors::StreamTreeError;
use crate::multi::MultiWriter;
use crate::stage::{PassThrough, Stage, StreamSource};
use crate::stream::{byte_channel, ByteStream, ByteWriter};
use crate::tee::tee;
use crate::tree::guard;
use crate::tree::node::{NodeId, TreeNode};
use crate::tree::{TreeConfig, TreeShared};

/// A handle onto the current leaf of a readable tree.
///
/// Built around a readable origin stage; grows downstream through
/// [`pipe`](ReadableTree::pipe) and [`split`](ReadableTree::split) and ends
/// with [`finish`](ReadableTree::finish), which hands the final byte
/// sequence to the caller.
pub struct ReadableTree {
    shared: Arc<TreeShared>,
    node: NodeId,
}

impl ReadableTree {
    /// Wraps a readable origin stage.
    #[must_use]
    pub fn new(stage: impl Stage + 'static) -> Self {
        Self::with_config(stage, TreeConfig::default())
    }

    /// Wraps a readable origin stage with explicit tuning.
    #[must_use]
    pub fn with_config(stage: impl Stage + 'static, config: TreeConfig) -> Self {
        let shared = Arc::new(TreeShared::new(config));
        let node = shared
            .state
            .lock()
            .insert(TreeNode::new(Box::new(stage), None, true));
        Self { shared, node }
    }

    /// Wraps a raw byte sequence as a readable origin.
    #[must_use]
    pub fn from_stream(stream: ByteStream) -> Self {
        Self::new(StreamSource::new(stream))
    }

    /// Attaches `stage` downstream of this position and returns the handle
    /// to the new leaf.
    #[must_use]
    pub fn pipe(self, stage: impl Stage + 'static) -> ReadableTree {
        let Self {
            shared,
            node: parent,
        } = self;
        let (child, write_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let output = state.node_mut(parent).stage.take_output();
            let mut stage: Box<dyn Stage> = Box::new(stage);
            stage.attach_input(output);
            let child = state.insert(TreeNode::new(stage, Some(parent), false));
            state.attach_child(parent, child);
            (child, !state.node(parent).origin)
        };
        guard::install_guard(&shared, parent, true, write_active);
        debug!(parent = %parent, child = %child, "pipe");
        ReadableTree {
            shared,
            node: child,
        }
    }

    /// Fans this position out into two independent readable branches.
    #[must_use]
    pub fn split2(self) -> Vec<ReadableTree> {
        self.split(2)
    }

    /// Fans this position out into `branches` independent readable branches
    /// over the same data (clamped to at least one).
    ///
    /// Every branch is an independent subtree the caller must drive to
    /// completion; an unfinished branch stalls backward propagation to this
    /// position and all of its ancestors.
    #[must_use]
    pub fn split(self, branches: usize) -> Vec<ReadableTree> {
        let Self {
            shared,
            node: parent,
        } = self;
        let (children, write_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let output = state.node_mut(parent).stage.take_output();
            let mut children = Vec::new();
            for branch in tee(output, branches.max(1), shared.config.channel_capacity) {
                let child = state.insert(TreeNode::new(Box::new(branch), Some(parent), false));
                state.attach_child(parent, child);
                children.push(child);
            }
            (children, !state.node(parent).origin)
        };
        guard::install_guard(&shared, parent, true, write_active);
        debug!(parent = %parent, branches = children.len(), "split");
        children
            .into_iter()
            .map(|node| ReadableTree {
                shared: Arc::clone(&shared),
                node,
            })
            .collect()
    }

    /// Marks this position as the tree's terminal observation point and
    /// returns the byte sequence for the caller to drive.
    #[must_use]
    pub fn finish(self) -> ByteStream {
        self.finish_inner(None)
    }

    /// Like [`finish`](ReadableTree::finish), also registering a callback
    /// fired exactly once with the subtree's final error state.
    #[must_use]
    pub fn finish_with(
        self,
        callback: impl FnOnce(Option<StreamTreeError>) + Send + 'static,
    ) -> ByteStream {
        self.finish_inner(Some(Box::new(callback)))
    }

    fn finish_inner(self, callback: Option<CompletionCallback>) -> ByteStream {
        let Self { shared, node } = self;
        let (stream, write_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let n = state.node_mut(node);
            n.callback = callback;
            (n.stage.take_output(), !n.origin)
        };
        guard::install_guard(&shared, node, false, write_active);
        debug!(node = %node, "readable finish");
        stream
    }
}

impl std::fmt::Debug for ReadableTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadableTree")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// A handle onto the root-most position of a writable tree.
///
/// Built around a writable terminal stage; grows upstream through
/// [`pipe_from`](WritableTree::pipe_from) and the join operations, and ends
/// with [`finish`](WritableTree::finish), which hands a writer to the
/// caller, or [`finish_from`](WritableTree::finish_from), which attaches a
/// producing sequence directly.
pub struct WritableTree {
    shared: Arc<TreeShared>,
    node: NodeId,
}

impl WritableTree {
    /// Wraps a writable terminal stage.
    #[must_use]
    pub fn new(stage: impl Stage + 'static) -> Self {
        Self::with_config(stage, TreeConfig::default())
    }

    /// Wraps a writable terminal stage with explicit tuning.
    #[must_use]
    pub fn with_config(stage: impl Stage + 'static, config: TreeConfig) -> Self {
        let shared = Arc::new(TreeShared::new(config));
        let node = shared
            .state
            .lock()
            .insert(TreeNode::new(Box::new(stage), None, true));
        Self { shared, node }
    }

    /// Attaches `stage` upstream of this position and returns the handle to
    /// the new root.
    #[must_use]
    pub fn pipe_from(self, stage: impl Stage + 'static) -> WritableTree {
        let Self {
            shared,
            node: child,
        } = self;
        let (parent, child_read_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let mut stage: Box<dyn Stage> = Box::new(stage);
            let output = stage.take_output();
            state.node_mut(child).stage.attach_input(output);
            let parent = state.insert(TreeNode::new(stage, None, false));
            state.attach_child(parent, child);
            (parent, !state.node(child).origin)
        };
        guard::install_guard(&shared, child, child_read_active, true);
        debug!(parent = %parent, child = %child, "pipe_from");
        WritableTree {
            shared,
            node: parent,
        }
    }

    /// Inserts a buffering pass-through upstream of this position and tees
    /// its output: one branch keeps feeding this subtree, `taps` branches
    /// (clamped to at least one) return as independent readable taps over
    /// everything written.
    #[must_use]
    pub fn join_readable(self, taps: usize) -> (WritableTree, Vec<ReadableTree>) {
        let Self {
            shared,
            node: sink,
        } = self;
        let (parent, midwife, reader_ids, sink_read_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let capacity = shared.config.channel_capacity;

            let mut hub: Box<dyn Stage> = Box::new(PassThrough::with_capacity(capacity));
            let hub_output = hub.take_output();
            let parent = state.insert(TreeNode::new(hub, None, false));

            let mut branches = tee(hub_output, taps.max(1) + 1, capacity);
            let mut feed: Box<dyn Stage> = Box::new(branches.remove(0));
            let feed_output = feed.take_output();
            state.node_mut(sink).stage.attach_input(feed_output);
            let midwife = state.insert(TreeNode::new(feed, None, false));
            state.attach_child(parent, midwife);
            state.attach_child(midwife, sink);

            let mut reader_ids = Vec::with_capacity(branches.len());
            for branch in branches {
                let id = state.insert(TreeNode::new(Box::new(branch), Some(parent), true));
                state.attach_child(parent, id);
                reader_ids.push(id);
            }
            (parent, midwife, reader_ids, !state.node(sink).origin)
        };
        guard::install_guard(&shared, sink, sink_read_active, true);
        guard::install_guard(&shared, midwife, true, true);
        debug!(parent = %parent, taps = reader_ids.len(), "join_readable");

        let readers = reader_ids
            .into_iter()
            .map(|node| ReadableTree {
                shared: Arc::clone(&shared),
                node,
            })
            .collect();
        (
            WritableTree {
                shared,
                node: parent,
            },
            readers,
        )
    }

    /// Replaces this position with a fan-in multiplexer writing every input
    /// byte to this subtree and to all `others` simultaneously.
    ///
    /// The combined node finishes only once this subtree and every one of
    /// `others` has individually finished.
    #[must_use]
    pub fn join_writable(self, others: Vec<Box<dyn Stage>>) -> WritableTree {
        self.join_writable_inner(others, Vec::new())
    }

    /// Like [`join_writable`](WritableTree::join_writable), also
    /// registering one completion callback per additional writable, in
    /// order.
    #[must_use]
    pub fn join_writable_with(
        self,
        others: Vec<Box<dyn Stage>>,
        callbacks: Vec<CompletionCallback>,
    ) -> WritableTree {
        self.join_writable_inner(others, callbacks)
    }

    fn join_writable_inner(
        self,
        others: Vec<Box<dyn Stage>>,
        callbacks: Vec<CompletionCallback>,
    ) -> WritableTree {
        let Self {
            shared,
            node: sink,
        } = self;
        let (parent, other_ids, sink_read_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let capacity = shared.config.channel_capacity;

            let mut writers = Vec::with_capacity(others.len() + 1);
            let (writer, input) = byte_channel(capacity);
            state.node_mut(sink).stage.attach_input(input);
            writers.push(writer);

            let mut prepared = Vec::with_capacity(others.len());
            for mut stage in others {
                let (writer, input) = byte_channel(capacity);
                stage.attach_input(input);
                writers.push(writer);
                prepared.push(stage);
            }

            let multi: Box<dyn Stage> = Box::new(MultiWriter::new(writers));
            let parent = state.insert(TreeNode::new(multi, None, false));
            state.attach_child(parent, sink);

            let mut callbacks = callbacks.into_iter();
            let mut other_ids = Vec::with_capacity(prepared.len());
            for stage in prepared {
                let id = state.insert(TreeNode::new(stage, Some(parent), false));
                state.attach_child(parent, id);
                state.node_mut(id).callback = callbacks.next();
                other_ids.push(id);
            }
            (parent, other_ids, !state.node(sink).origin)
        };
        guard::install_guard(&shared, sink, sink_read_active, true);
        for id in &other_ids {
            guard::install_guard(&shared, *id, false, true);
        }
        debug!(parent = %parent, destinations = other_ids.len() + 1, "join_writable");
        WritableTree {
            shared,
            node: parent,
        }
    }

    /// Marks this position as the tree's terminal observation point and
    /// returns a writer for the caller to drive.
    #[must_use]
    pub fn finish(self) -> ByteWriter {
        self.finish_inner(None)
    }

    /// Like [`finish`](WritableTree::finish), also registering a callback
    /// fired exactly once with the tree's final error state.
    #[must_use]
    pub fn finish_with(
        self,
        callback: impl FnOnce(Option<StreamTreeError>) + Send + 'static,
    ) -> ByteWriter {
        self.finish_inner(Some(Box::new(callback)))
    }

    fn finish_inner(self, callback: Option<CompletionCallback>) -> ByteWriter {
        let Self { shared, node } = self;
        let (writer, read_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let (writer, input) = byte_channel(shared.config.channel_capacity);
            let n = state.node_mut(node);
            n.callback = callback;
            n.stage.attach_input(input);
            (writer, !n.origin)
        };
        guard::install_guard(&shared, node, read_active, true);
        debug!(node = %node, "writable finish");
        writer
    }

    /// Finishes the tree by attaching `source` as its producer instead of
    /// returning a writer.
    pub fn finish_from(self, source: ByteStream) {
        self.finish_from_inner(source, None);
    }

    /// Like [`finish_from`](WritableTree::finish_from), also registering a
    /// completion callback.
    pub fn finish_from_with(
        self,
        source: ByteStream,
        callback: impl FnOnce(Option<StreamTreeError>) + Send + 'static,
    ) {
        self.finish_from_inner(source, Some(Box::new(callback)));
    }

    fn finish_from_inner(self, source: ByteStream, callback: Option<CompletionCallback>) {
        let Self { shared, node } = self;
        let (producer, read_active) = {
            let mut lock = shared.state.lock();
            let state = &mut *lock;
            let mut stage: Box<dyn Stage> = Box::new(StreamSource::new(source));
            let output = stage.take_output();
            let n = state.node_mut(node);
            n.callback = callback;
            n.stage.attach_input(output);
            let read_active = !n.origin;
            let producer = state.insert(TreeNode::new(stage, None, false));
            state.attach_child(producer, node);
            (producer, read_active)
        };
        guard::install_guard(&shared, node, read_active, true);
        guard::install_guard(&shared, producer, true, false);
        debug!(node = %node, producer = %producer, "writable finish_from");
    }
}

impl std::fmt::Debug for WritableTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableTree")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{ChunkSource, CollectSink, MapStage};
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pipe_moves_bytes_downstream() {
        let tree = ReadableTree::new(ChunkSource::new(vec![
            Bytes::from("ab"),
            Bytes::from("cd"),
        ]));
        let stream = tree
            .pipe(MapStage::new(|chunk: Bytes| {
                Bytes::from(chunk.to_ascii_uppercase())
            }))
            .finish();

        assert_eq!(stream.collect_bytes().await.unwrap(), b"ABCD");
    }

    #[tokio::test]
    async fn test_split_branches_see_identical_data() {
        let tree = ReadableTree::new(ChunkSource::single("shared"));
        let mut branches = tree.split2();

        let right = branches.pop().unwrap().finish();
        let left = branches.pop().unwrap().finish();

        assert_eq!(left.collect_bytes().await.unwrap(), b"shared");
        assert_eq!(right.collect_bytes().await.unwrap(), b"shared");
    }

    #[tokio::test]
    async fn test_writable_finish_feeds_sink() {
        let sink = CollectSink::new();
        let buffer = sink.buffer();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let writer = WritableTree::new(sink).finish_with(move |err| {
            let _ = tx.send(err);
        });
        writer.write("payload").await.unwrap();
        writer.close();

        assert_eq!(rx.await.unwrap(), None);
        assert_eq!(buffer.contents(), b"payload");
    }

    #[tokio::test]
    async fn test_finish_from_drives_sink_without_writer() {
        let sink = CollectSink::new();
        let buffer = sink.buffer();
        let (tx, rx) = tokio::sync::oneshot::channel();

        WritableTree::new(sink).finish_from_with(
            ByteStream::from_chunks(vec![Bytes::from("pushed")]),
            move |err| {
                let _ = tx.send(err);
            },
        );

        assert_eq!(rx.await.unwrap(), None);
        assert_eq!(buffer.contents(), b"pushed");
    }
}
