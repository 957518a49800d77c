//! Transform stages.

use bytes::Bytes;
use futures::StreamExt;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::errors::StreamTreeError;
use crate::stage::Stage;
use crate::stream::ByteStream;

/// Applies a per-chunk transform to a byte sequence.
pub struct MapStage<F> {
    func: Option<F>,
    input: Option<ByteStream>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
}

impl<F> MapStage<F>
where
    F: FnMut(Bytes) -> Bytes + Send + 'static,
{
    /// Creates a transform applying `func` to every chunk.
    #[must_use]
    pub fn new(func: F) -> Self {
        let (cell, listener) = completion_pair();
        Self {
            func: Some(func),
            input: None,
            cell,
            listener: Some(listener),
        }
    }
}

impl<F> std::fmt::Debug for MapStage<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapStage")
            .field("attached", &self.input.is_some())
            .finish_non_exhaustive()
    }
}

impl<F> Stage for MapStage<F>
where
    F: FnMut(Bytes) -> Bytes + Send + 'static,
{
    fn attach_input(&mut self, input: ByteStream) {
        self.input = Some(input);
    }

    fn take_output(&mut self) -> ByteStream {
        let Some(input) = self.input.take() else {
            return ByteStream::empty();
        };
        let Some(mut func) = self.func.take() else {
            return ByteStream::empty();
        };
        ByteStream::new(input.map(move |item| item.map(|chunk| func(chunk))))
            .instrumented(self.cell.clone())
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn destroy(&mut self) {
        self.input = None;
        self.func = None;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}
