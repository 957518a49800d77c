//! Byte plumbing: the `ByteStream` sequence type and bounded chunk channels.
//!
//! A `ByteStream` is a sequence of `Bytes` chunks ending either cleanly or
//! with a single terminal error. The bounded channel gives the writer
//! backpressure: a send waits for capacity, so a slow consumer throttles its
//! producer the way an OS pipe would.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::completion::CompletionCell;
use crate::errors::StreamTreeError;

/// Default bound of a byte channel, in chunks.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// One item flowing along a tree edge.
pub type Chunk = Result<Bytes, StreamTreeError>;

/// A readable byte sequence.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = Chunk> + Send>>,
}

impl ByteStream {
    /// Wraps any chunk stream.
    pub fn new(stream: impl Stream<Item = Chunk> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// An already-ended sequence.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(stream::empty())
    }

    /// A sequence yielding the given chunks, then ending cleanly.
    #[must_use]
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self::new(stream::iter(chunks.into_iter().map(Ok)))
    }

    /// A sequence that fails immediately.
    #[must_use]
    pub fn failing(err: StreamTreeError) -> Self {
        Self::new(stream::iter([Err(err)]))
    }

    /// Wraps the sequence so `cell` fires when it terminates: with the error
    /// for an erroring sequence, cleanly at end-of-stream.
    #[must_use]
    pub fn instrumented(self, cell: CompletionCell) -> Self {
        Self::new(Instrumented {
            inner: self,
            cell: Some(cell),
        })
    }

    /// Drains the sequence into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>, StreamTreeError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.extend_from_slice(&item?);
        }
        Ok(out)
    }
}

impl Stream for ByteStream {
    type Item = Chunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

/// Fires a completion cell at the sequence's terminal event.
struct Instrumented {
    inner: ByteStream,
    cell: Option<CompletionCell>,
}

impl Stream for Instrumented {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(err))) => {
                if let Some(cell) = this.cell.take() {
                    cell.complete(Some(err.clone()));
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if let Some(cell) = this.cell.take() {
                    cell.complete(None);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writing half of a bounded byte channel.
///
/// Clones share the channel; the sequence ends once every clone has been
/// dropped or closed.
#[derive(Debug, Clone)]
pub struct ByteWriter {
    tx: mpsc::Sender<Chunk>,
}

impl ByteWriter {
    /// Sends one chunk, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`StreamTreeError::BrokenPipe`] when the reading side is gone.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), StreamTreeError> {
        self.tx
            .send(Ok(chunk.into()))
            .await
            .map_err(|_| StreamTreeError::BrokenPipe)
    }

    /// Terminates the sequence with an error. This is how a failure is
    /// injected into a tree from outside.
    pub async fn fail(self, err: StreamTreeError) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// Ends the sequence cleanly. Dropping the last clone has the same
    /// effect.
    pub fn close(self) {}

    /// Returns true when the reading side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) async fn send_item(&self, item: Chunk) -> Result<(), StreamTreeError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| StreamTreeError::BrokenPipe)
    }
}

/// Creates a bounded writer/stream pair holding at most `capacity` chunks.
#[must_use]
pub fn byte_channel(capacity: usize) -> (ByteWriter, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ByteWriter { tx }, ByteStream::new(ChannelStream { rx }))
}

struct ChannelStream {
    rx: mpsc::Receiver<Chunk>,
}

impl Stream for ChannelStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
