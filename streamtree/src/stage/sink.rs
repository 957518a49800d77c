//! Writable terminal stages.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::errors::StreamTreeError;
use crate::stage::Stage;
use crate::stream::ByteStream;

/// Shared view of a [`CollectSink`]'s buffer, usable after the sink itself
/// has been moved into a tree.
#[derive(Debug, Clone, Default)]
pub struct CollectBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CollectBuffer {
    /// Returns a copy of everything collected so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Returns the number of bytes collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Returns true while nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }
}

/// A writable terminal collecting every input byte into memory.
#[derive(Debug)]
pub struct CollectSink {
    buffer: CollectBuffer,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
    stop: Arc<AtomicBool>,
}

impl CollectSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        let (cell, listener) = completion_pair();
        Self {
            buffer: CollectBuffer::default(),
            cell,
            listener: Some(listener),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a shared handle onto the sink's buffer.
    #[must_use]
    pub fn buffer(&self) -> CollectBuffer {
        self.buffer.clone()
    }
}

impl Default for CollectSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for CollectSink {
    fn attach_input(&mut self, mut input: ByteStream) {
        let buffer = self.buffer.clone();
        let cell = self.cell.clone();
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            while let Some(item) = input.next().await {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                match item {
                    Ok(chunk) => buffer.bytes.lock().extend_from_slice(&chunk),
                    Err(err) => {
                        cell.complete(Some(err));
                        return;
                    }
                }
            }
            cell.complete(None);
        });
    }

    fn take_output(&mut self) -> ByteStream {
        ByteStream::empty()
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn destroy(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}

/// A writable terminal that discards its input, counting the bytes it saw.
#[derive(Debug)]
pub struct NullSink {
    seen: Arc<AtomicU64>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
    stop: Arc<AtomicBool>,
}

impl NullSink {
    /// Creates a discarding sink.
    #[must_use]
    pub fn new() -> Self {
        let (cell, listener) = completion_pair();
        Self {
            seen: Arc::new(AtomicU64::new(0)),
            cell,
            listener: Some(listener),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a counter of bytes discarded so far.
    #[must_use]
    pub fn bytes_seen(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.seen)
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for NullSink {
    fn attach_input(&mut self, mut input: ByteStream) {
        let seen = Arc::clone(&self.seen);
        let cell = self.cell.clone();
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            while let Some(item) = input.next().await {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                match item {
                    Ok(chunk) => {
                        seen.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    }
                    Err(err) => {
                        cell.complete(Some(err));
                        return;
                    }
                }
            }
            cell.complete(None);
        });
    }

    fn take_output(&mut self) -> ByteStream {
        ByteStream::empty()
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn destroy(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}
