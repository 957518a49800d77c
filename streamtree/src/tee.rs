//! Duplicating adapter: independent readable views over one byte sequence.
//!
//! The pump awaits every live branch send, so the slowest consumer throttles
//! the shared upstream; a destroyed branch detaches without disturbing its
//! siblings. An upstream error is replicated to every branch before the pump
//! stops.

use futures::StreamExt;
use tracing::trace;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::errors::StreamTreeError;
use crate::stage::Stage;
use crate::stream::{byte_channel, ByteStream, ByteWriter};

/// One independent readable view produced by [`tee`].
#[derive(Debug)]
pub struct TeeBranch {
    output: Option<ByteStream>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
}

impl Stage for TeeBranch {
    fn attach_input(&mut self, _input: ByteStream) {
        trace!("tee branch ignores attached input");
    }

    fn take_output(&mut self) -> ByteStream {
        self.output.take().unwrap_or_else(ByteStream::empty)
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn destroy(&mut self) {
        // Dropping the receiving half detaches this branch from the pump.
        self.output = None;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}

/// Splits `source` into `count` independent readable branches buffering at
/// most `capacity` chunks each.
#[must_use]
pub fn tee(source: ByteStream, count: usize, capacity: usize) -> Vec<TeeBranch> {
    let count = count.max(1);
    let mut writers: Vec<Option<ByteWriter>> = Vec::with_capacity(count);
    let mut branches = Vec::with_capacity(count);
    for _ in 0..count {
        let (writer, stream) = byte_channel(capacity);
        let (cell, listener) = completion_pair();
        writers.push(Some(writer));
        branches.push(TeeBranch {
            output: Some(stream.instrumented(cell.clone())),
            cell,
            listener: Some(listener),
        });
    }

    tokio::spawn(async move {
        let mut source = source;
        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    let mut live = 0usize;
                    for slot in &mut writers {
                        let Some(writer) = slot else { continue };
                        if writer.send_item(Ok(chunk.clone())).await.is_err() {
                            trace!("tee branch detached");
                            *slot = None;
                        } else {
                            live += 1;
                        }
                    }
                    if live == 0 {
                        trace!("every tee branch detached; dropping upstream");
                        return;
                    }
                }
                Err(err) => {
                    for slot in &mut writers {
                        if let Some(writer) = slot {
                            let _ = writer.send_item(Err(err.clone())).await;
                        }
                    }
                    return;
                }
            }
        }
        // Writers drop here: every remaining branch observes end-of-stream.
    });

    branches
}
