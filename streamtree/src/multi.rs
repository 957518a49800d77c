//! Fan-in write multiplexer: one input sequence replicated to several
//! destinations.
//!
//! Every destination send is awaited, so all destinations exert
//! backpressure on the shared producer. The multiplexer itself completes
//! when distribution finishes; waiting for the destinations is the job of
//! the tree barrier, not of this stage.

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::errors::StreamTreeError;
use crate::stage::Stage;
use crate::stream::{ByteStream, ByteWriter};

/// A writable stage replicating every input chunk to all destination
/// writers.
#[derive(Debug)]
pub struct MultiWriter {
    writers: Option<Vec<ByteWriter>>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
    stop: Arc<AtomicBool>,
}

impl MultiWriter {
    /// Creates a multiplexer over the given destination writers.
    ///
    /// `WritableTree::join_writable` builds one of these with a writer per
    /// destination stage; standalone use only needs the writer halves of
    /// [`crate::stream::byte_channel`] pairs.
    #[must_use]
    pub fn new(writers: Vec<ByteWriter>) -> Self {
        let (cell, listener) = completion_pair();
        Self {
            writers: Some(writers),
            cell,
            listener: Some(listener),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Stage for MultiWriter {
    fn attach_input(&mut self, mut input: ByteStream) {
        let Some(writers) = self.writers.take() else {
            return;
        };
        let cell = self.cell.clone();
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            let mut writers: Vec<Option<ByteWriter>> =
                writers.into_iter().map(Some).collect();
            while let Some(item) = input.next().await {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                match item {
                    Ok(chunk) => {
                        let mut live = 0usize;
                        for slot in &mut writers {
                            let Some(writer) = slot else { continue };
                            if writer.send_item(Ok(chunk.clone())).await.is_err() {
                                trace!("multiplexer destination detached");
                                *slot = None;
                            } else {
                                live += 1;
                            }
                        }
                        if live == 0 {
                            cell.complete(Some(StreamTreeError::BrokenPipe));
                            return;
                        }
                    }
                    Err(err) => {
                        for slot in &mut writers {
                            if let Some(writer) = slot {
                                let _ = writer.send_item(Err(err.clone())).await;
                            }
                        }
                        cell.complete(Some(err));
                        return;
                    }
                }
            }
            // Writers drop here: every destination observes end-of-stream.
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
        self.writers = None;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}
