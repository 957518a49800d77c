//! Readable origin stages.

use bytes::Bytes;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::errors::StreamTreeError;
use crate::stage::Stage;
use crate::stream::ByteStream;

/// A readable origin producing a fixed sequence of chunks.
#[derive(Debug)]
pub struct ChunkSource {
    output: Option<ByteStream>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
}

impl ChunkSource {
    /// Creates a source yielding `chunks` in order, then ending cleanly.
    #[must_use]
    pub fn new(chunks: Vec<Bytes>) -> Self {
        let (cell, listener) = completion_pair();
        Self {
            output: Some(ByteStream::from_chunks(chunks).instrumented(cell.clone())),
            cell,
            listener: Some(listener),
        }
    }

    /// Creates a source yielding one chunk.
    #[must_use]
    pub fn single(chunk: impl Into<Bytes>) -> Self {
        Self::new(vec![chunk.into()])
    }
}

impl Stage for ChunkSource {
    fn attach_input(&mut self, _input: ByteStream) {
        tracing::trace!("chunk source ignores attached input");
    }

    fn take_output(&mut self) -> ByteStream {
        self.output.take().unwrap_or_else(ByteStream::empty)
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn destroy(&mut self) {
        self.output = None;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}

/// A readable origin wrapping an arbitrary byte sequence.
#[derive(Debug)]
pub struct StreamSource {
    output: Option<ByteStream>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
}

impl StreamSource {
    /// Wraps `stream` so its terminal event becomes the stage's close signal.
    #[must_use]
    pub fn new(stream: ByteStream) -> Self {
        let (cell, listener) = completion_pair();
        Self {
            output: Some(stream.instrumented(cell.clone())),
            cell,
            listener: Some(listener),
        }
    }
}

impl Stage for StreamSource {
    fn attach_input(&mut self, _input: ByteStream) {
        tracing::trace!("stream source ignores attached input");
    }

    fn take_output(&mut self) -> ByteStream {
        self.output.take().unwrap_or_else(ByteStream::empty)
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn destroy(&mut self) {
        self.output = None;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}
