//! Integration scenarios for tree lifecycle behavior.
//!
//! Each test builds a small tree out of instrumented stages, fires
//! completion signals in a controlled order, and asserts who was released,
//! how, and what every callback observed.

use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::errors::StreamTreeError;
use crate::stage::{ChunkSource, CollectSink, ReleaseStrategy};
use crate::stream::ByteStream;
use crate::testing::{FailingSource, InstrumentedStage};
use crate::tree::{ReadableTree, WritableTree};
use crate::writer::write_tree;

type Outcome = oneshot::Receiver<Option<StreamTreeError>>;

/// Routes engine traces to the test output when `RUST_LOG` asks for them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn outcome() -> (
    impl FnOnce(Option<StreamTreeError>) + Send + 'static,
    Outcome,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |err| {
            let _ = tx.send(err);
        },
        rx,
    )
}

/// Lets watcher tasks drain any completion signals already fired.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_leaf_failure_releases_whole_chain() {
    init_tracing();
    let a = InstrumentedStage::manual();
    let b = InstrumentedStage::manual();
    let c = InstrumentedStage::manual();
    let (a_log, b_log, c_log) = (a.release_log(), b.release_log(), c.release_log());
    let c_cell = c.completion_cell();
    let (callback, result) = outcome();

    let _stream = ReadableTree::new(a).pipe(b).pipe(c).finish_with(callback);

    c_cell.complete(Some(StreamTreeError::stage("c failed")));

    assert_eq!(result.await.unwrap(), Some(StreamTreeError::stage("c failed")));
    assert_eq!(a_log.destroy_count(), 1);
    assert_eq!(b_log.destroy_count(), 1);
    // The failed leaf closed natively; its own capability never runs.
    assert_eq!(c_log.total(), 0);
}

#[tokio::test]
async fn test_root_failure_tears_down_descendants() {
    let a = InstrumentedStage::manual();
    let b = InstrumentedStage::manual();
    let c = InstrumentedStage::manual();
    let (a_log, b_log, c_log) = (a.release_log(), b.release_log(), c.release_log());
    let a_cell = a.completion_cell();
    let (callback, result) = outcome();

    let _stream = ReadableTree::new(a).pipe(b).pipe(c).finish_with(callback);

    a_cell.complete(Some(StreamTreeError::stage("a failed")));

    // Forward propagation assigns the origin's error to every descendant
    // and still delivers the leaf's callback.
    assert_eq!(result.await.unwrap(), Some(StreamTreeError::stage("a failed")));
    assert_eq!(a_log.total(), 0);
    assert_eq!(b_log.destroy_count(), 1);
    assert_eq!(c_log.destroy_count(), 1);
}

#[tokio::test]
async fn test_single_child_chain_collapses_in_one_pass() {
    let a = InstrumentedStage::manual();
    let b = InstrumentedStage::manual();
    let c = InstrumentedStage::manual();
    let d = InstrumentedStage::manual();
    let logs = [a.release_log(), b.release_log(), c.release_log()];
    let d_cell = d.completion_cell();
    let (callback, result) = outcome();

    let _stream = ReadableTree::new(a)
        .pipe(b)
        .pipe(c)
        .pipe(d)
        .finish_with(callback);

    d_cell.complete(None);

    assert_eq!(result.await.unwrap(), None);
    for log in &logs {
        assert_eq!(log.destroy_count(), 1);
    }
}

#[tokio::test]
async fn test_split_parent_waits_for_every_branch() {
    let parent = InstrumentedStage::manual();
    let parent_log = parent.release_log();

    let mut branches = ReadableTree::new(parent).split2();
    let sink_y = InstrumentedStage::manual();
    let y_cell = sink_y.completion_cell();
    let (cb_y, result_y) = outcome();
    let _y = branches.pop().unwrap().pipe(sink_y).finish_with(cb_y);

    let sink_x = InstrumentedStage::manual();
    let x_cell = sink_x.completion_cell();
    let (cb_x, result_x) = outcome();
    let _x = branches.pop().unwrap().pipe(sink_x).finish_with(cb_x);

    x_cell.complete(None);
    assert_eq!(result_x.await.unwrap(), None);
    // One branch done: the shared source must still be alive.
    assert_eq!(parent_log.total(), 0);

    y_cell.complete(None);
    assert_eq!(result_y.await.unwrap(), None);
    settle().await;
    assert_eq!(parent_log.destroy_count(), 1);
}

#[tokio::test]
async fn test_branch_failure_is_isolated_from_siblings() {
    init_tracing();
    let parent = InstrumentedStage::manual();
    let parent_log = parent.release_log();

    let mut branches = ReadableTree::new(parent).split2();
    let sink_y = InstrumentedStage::manual();
    let y_cell = sink_y.completion_cell();
    let (cb_y, result_y) = outcome();
    let _y = branches.pop().unwrap().pipe(sink_y).finish_with(cb_y);

    let sink_x = InstrumentedStage::manual();
    let x_log = sink_x.release_log();
    let x_cell = sink_x.completion_cell();
    let (cb_x, result_x) = outcome();
    let _x = branches.pop().unwrap().pipe(sink_x).finish_with(cb_x);

    y_cell.complete(Some(StreamTreeError::stage("y failed")));
    assert_eq!(
        result_y.await.unwrap(),
        Some(StreamTreeError::stage("y failed"))
    );
    settle().await;
    // The sibling is neither force-released nor failed, and the shared
    // source still waits for it.
    assert_eq!(x_log.total(), 0);
    assert_eq!(parent_log.total(), 0);

    x_cell.complete(None);
    assert_eq!(result_x.await.unwrap(), None);
    settle().await;
    assert_eq!(parent_log.destroy_count(), 1);
}

#[tokio::test]
async fn test_join_writable_carries_first_branch_error() {
    let sink = InstrumentedStage::manual();
    let w1 = InstrumentedStage::manual();
    let w2 = InstrumentedStage::manual();
    let (sink_log, w1_log) = (sink.release_log(), w1.release_log());
    let (sink_cell, w1_cell, w2_cell) = (
        sink.completion_cell(),
        w1.completion_cell(),
        w2.completion_cell(),
    );
    let (callback, result) = outcome();

    let _writer = WritableTree::new(sink)
        .join_writable(vec![Box::new(w1), Box::new(w2)])
        .finish_with(callback);

    sink_cell.complete(None);
    w1_cell.complete(None);
    w2_cell.complete(Some(StreamTreeError::stage("w2 failed")));

    assert_eq!(
        result.await.unwrap(),
        Some(StreamTreeError::stage("w2 failed"))
    );
    // Destinations that already completed cleanly are not re-released.
    assert_eq!(sink_log.total(), 0);
    assert_eq!(w1_log.total(), 0);
}

#[tokio::test]
async fn test_join_writable_with_per_destination_callbacks() {
    let sink = InstrumentedStage::manual();
    let w1 = InstrumentedStage::manual();
    let w2 = InstrumentedStage::manual();
    let (sink_cell, w1_cell, w2_cell) = (
        sink.completion_cell(),
        w1.completion_cell(),
        w2.completion_cell(),
    );
    let (cb_w1, result_w1) = outcome();
    let (cb_w2, result_w2) = outcome();
    let (callback, result) = outcome();

    let _writer = WritableTree::new(sink)
        .join_writable_with(
            vec![Box::new(w1), Box::new(w2)],
            vec![Box::new(cb_w1), Box::new(cb_w2)],
        )
        .finish_with(callback);

    w1_cell.complete(None);
    w2_cell.complete(Some(StreamTreeError::stage("late failure")));
    sink_cell.complete(None);

    assert_eq!(result_w1.await.unwrap(), None);
    assert_eq!(
        result_w2.await.unwrap(),
        Some(StreamTreeError::stage("late failure"))
    );
    assert_eq!(
        result.await.unwrap(),
        Some(StreamTreeError::stage("late failure"))
    );
}

#[tokio::test]
async fn test_close_capability_preferred_for_descriptor_stages() {
    let source = InstrumentedStage::with_strategy(ReleaseStrategy::Close);
    let source_log = source.release_log();
    let sink = InstrumentedStage::manual();
    let sink_cell = sink.completion_cell();
    let (callback, result) = outcome();

    let _stream = ReadableTree::new(source).pipe(sink).finish_with(callback);

    sink_cell.complete(None);

    assert_eq!(result.await.unwrap(), None);
    settle().await;
    assert_eq!(source_log.close_count(), 1);
    assert_eq!(source_log.destroy_count(), 0);
}

#[tokio::test]
async fn test_abort_capability_preferred_for_request_stages() {
    let source = InstrumentedStage::with_strategy(ReleaseStrategy::Abort);
    let source_log = source.release_log();
    let sink = InstrumentedStage::manual();
    let sink_cell = sink.completion_cell();
    let (callback, result) = outcome();

    let _stream = ReadableTree::new(source).pipe(sink).finish_with(callback);

    sink_cell.complete(Some(StreamTreeError::stage("downstream died")));

    assert_eq!(
        result.await.unwrap(),
        Some(StreamTreeError::stage("downstream died"))
    );
    settle().await;
    assert_eq!(source_log.abort_count(), 1);
    assert_eq!(source_log.destroy_count(), 0);
}

#[tokio::test]
async fn test_unreleasable_stage_synthesizes_failure() {
    let sink = InstrumentedStage::manual();
    let sink_cell = sink.completion_cell();
    let producer = InstrumentedStage::with_strategy(ReleaseStrategy::None);
    let producer_log = producer.release_log();
    let (callback, result) = outcome();

    let _writer = WritableTree::new(sink)
        .pipe_from(producer)
        .finish_with(callback);

    sink_cell.complete(None);

    assert_eq!(result.await.unwrap(), Some(StreamTreeError::Unreleasable));
    assert_eq!(producer_log.total(), 0);
}

#[tokio::test]
async fn test_release_is_idempotent_under_racing_signals() {
    let a = InstrumentedStage::manual();
    let b = InstrumentedStage::manual();
    let a_log = a.release_log();
    let (a_cell, b_cell) = (a.completion_cell(), b.completion_cell());
    let (callback, result) = outcome();

    let _stream = ReadableTree::new(a).pipe(b).finish_with(callback);

    // The leaf fails, force-releasing the root; the root's own native
    // signal lands right after and must be ignored.
    b_cell.complete(Some(StreamTreeError::stage("torn")));
    assert_eq!(result.await.unwrap(), Some(StreamTreeError::stage("torn")));
    a_cell.complete(None);
    settle().await;

    assert_eq!(a_log.destroy_count(), 1);
}

#[tokio::test]
async fn test_callback_fires_exactly_once() {
    let a = InstrumentedStage::manual();
    let b = InstrumentedStage::manual();
    let (a_cell, b_cell) = (a.completion_cell(), b.completion_cell());
    let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = std::sync::Arc::clone(&fired);

    let _stream = ReadableTree::new(a).pipe(b).finish_with(move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    b_cell.complete(Some(StreamTreeError::stage("first")));
    a_cell.complete(Some(StreamTreeError::stage("second")));
    settle().await;

    assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_split_streams_deliver_identical_bytes_end_to_end() {
    let source = ChunkSource::new(vec![Bytes::from("tree"), Bytes::from("stream")]);
    let mut branches = ReadableTree::new(source).split2();

    let (cb_right, right_done) = outcome();
    let right = branches.pop().unwrap().finish_with(cb_right);
    let (cb_left, left_done) = outcome();
    let left = branches.pop().unwrap().finish_with(cb_left);

    assert_eq!(left.collect_bytes().await.unwrap(), b"treestream");
    assert_eq!(right.collect_bytes().await.unwrap(), b"treestream");
    assert_eq!(left_done.await.unwrap(), None);
    assert_eq!(right_done.await.unwrap(), None);
}

#[tokio::test]
async fn test_failing_source_error_reaches_finish_callback_end_to_end() {
    let source = FailingSource::new(
        vec![Bytes::from("partial")],
        StreamTreeError::stage("disk gone"),
    );
    let (callback, result) = outcome();

    let stream = ReadableTree::new(source).finish_with(callback);

    assert_eq!(
        stream.collect_bytes().await.unwrap_err(),
        StreamTreeError::stage("disk gone")
    );
    assert_eq!(result.await.unwrap(), Some(StreamTreeError::stage("disk gone")));
}

#[tokio::test]
async fn test_join_readable_taps_observe_written_bytes() {
    let sink = CollectSink::new();
    let buffer = sink.buffer();

    let (tree, mut taps) = WritableTree::new(sink).join_readable(1);
    let tap = taps.pop().unwrap().finish();

    let (result, tapped) = tokio::join!(
        write_tree(tree, |writer| async move {
            writer.write("observed ").await?;
            writer.write("bytes").await?;
            Ok(())
        }),
        tap.collect_bytes(),
    );

    assert_eq!(result, Ok(()));
    assert_eq!(buffer.contents(), b"observed bytes");
    assert_eq!(tapped.unwrap(), b"observed bytes");
}

#[tokio::test]
async fn test_write_tree_failure_injection_reaches_sink_callback() {
    let sink = CollectSink::new();
    let tree = WritableTree::new(sink);

    let result = write_tree(tree, |writer| async move {
        writer.write("doomed").await?;
        Err(StreamTreeError::stage("cancelled"))
    })
    .await;

    assert_eq!(result, Err(StreamTreeError::stage("cancelled")));
}

#[tokio::test]
async fn test_finish_from_attaches_producer_as_parent() {
    let sink = InstrumentedStage::sink();
    let sink_log = sink.release_log();
    let (callback, result) = outcome();

    WritableTree::new(sink).finish_from_with(
        ByteStream::from_chunks(vec![Bytes::from("fed")]),
        callback,
    );

    assert_eq!(result.await.unwrap(), None);
    // The sink completed natively; nothing was force-released.
    assert_eq!(sink_log.total(), 0);
}
