//! Single-fire completion signalling between stages and the tree.
//!
//! Every stage emits exactly one terminal close signal. The cell/listener
//! pair models that as a single-resolution result channel: whichever path
//! reaches the cell first (native completion or forced release) wins, and
//! every later fire is a no-op.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::errors::StreamTreeError;

/// Callback registered through a `finish` operation, fired exactly once with
/// the node's final error state.
pub type CompletionCallback = Box<dyn FnOnce(Option<StreamTreeError>) + Send>;

/// Sending half of a stage's terminal close signal.
///
/// Cloneable so independent paths can race to resolve it.
#[derive(Debug, Clone)]
pub struct CompletionCell {
    tx: Arc<Mutex<Option<oneshot::Sender<Option<StreamTreeError>>>>>,
}

/// Receiving half: resolves once with the stage's final error state.
#[derive(Debug)]
pub struct CompletionListener {
    rx: oneshot::Receiver<Option<StreamTreeError>>,
}

/// Creates a connected cell/listener pair.
#[must_use]
pub fn completion_pair() -> (CompletionCell, CompletionListener) {
    let (tx, rx) = oneshot::channel();
    (
        CompletionCell {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        CompletionListener { rx },
    )
}

impl CompletionCell {
    /// Resolves the listener. The first call wins; later calls are no-ops.
    pub fn complete(&self, err: Option<StreamTreeError>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(err);
        }
    }

    /// Returns true once the signal has fired.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Future for CompletionListener {
    type Output = Option<StreamTreeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(err)) => Poll::Ready(err),
            // Cell dropped without firing: the stage went away silently,
            // which the tree treats as a clean close.
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
