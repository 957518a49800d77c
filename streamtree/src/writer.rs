//! Awaitable completion wrapper over a writable tree.
//!
//! Sugar over `finish`: one call drives a byte-producing closure against
//! the tree's writer and resolves exactly once with the tree's final
//! outcome.

use std::future::Future;
use tokio::sync::oneshot;

use crate::errors::StreamTreeError;
use crate::stream::ByteWriter;
use crate::tree::WritableTree;

/// Drives `tree` to completion.
///
/// Finishes the outermost writable node, runs `produce` against the
/// obtained writer concurrently with the wait, and resolves once the whole
/// tree has finished. A producer error is injected into the tree as a
/// failure and comes back out as the resolved error.
///
/// # Errors
///
/// Returns the first error observed anywhere in the tree's causal closure.
pub async fn write_tree<F, Fut>(tree: WritableTree, produce: F) -> Result<(), StreamTreeError>
where
    F: FnOnce(ByteWriter) -> Fut,
    Fut: Future<Output = Result<(), StreamTreeError>>,
{
    let (tx, rx) = oneshot::channel();
    let writer = tree.finish_with(move |err| {
        let _ = tx.send(err);
    });

    let injector = writer.clone();
    match produce(writer).await {
        Ok(()) => drop(injector),
        Err(err) => injector.fail(err).await,
    }

    match rx.await {
        Ok(None) => Ok(()),
        Ok(Some(err)) => Err(err),
        // The callback can only vanish unfired if the tree was torn down
        // without completing.
        Err(_) => Err(StreamTreeError::Destroyed),
    }
}
