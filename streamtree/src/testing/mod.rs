//! Instrumented stages for exercising tree lifecycle behavior.
//!
//! The instrumented stage records which release capability the cleanup
//! guard invoked and how often, and exposes its completion cell so a test
//! can fire the native close signal at a precise moment.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::errors::StreamTreeError;
use crate::stage::{ReleaseStrategy, Stage};
use crate::stream::ByteStream;

/// Shared record of release-capability invocations on one stage.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLog {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Debug, Default)]
struct LogInner {
    close: usize,
    abort: usize,
    destroy: usize,
}

impl ReleaseLog {
    /// Number of `close` invocations.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.inner.lock().close
    }

    /// Number of `abort` invocations.
    #[must_use]
    pub fn abort_count(&self) -> usize {
        self.inner.lock().abort
    }

    /// Number of `destroy` invocations.
    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.inner.lock().destroy
    }

    /// Total release invocations of any kind.
    #[must_use]
    pub fn total(&self) -> usize {
        let inner = self.inner.lock();
        inner.close + inner.abort + inner.destroy
    }
}

/// A stage that records every release-capability invocation.
///
/// By default it is inert: it drains any attached input without completing,
/// so a test triggers the native close signal itself through
/// [`InstrumentedStage::completion_cell`]. [`InstrumentedStage::sink`]
/// completes on its own once the attached input terminates.
#[derive(Debug)]
pub struct InstrumentedStage {
    strategy: ReleaseStrategy,
    auto_complete: bool,
    log: ReleaseLog,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
    output: Option<ByteStream>,
}

impl InstrumentedStage {
    /// Creates an inert stage with the default destroy capability.
    #[must_use]
    pub fn manual() -> Self {
        Self::with_strategy(ReleaseStrategy::Destroy)
    }

    /// Creates an inert stage declaring `strategy`.
    #[must_use]
    pub fn with_strategy(strategy: ReleaseStrategy) -> Self {
        let (cell, listener) = completion_pair();
        Self {
            strategy,
            auto_complete: false,
            log: ReleaseLog::default(),
            cell,
            listener: Some(listener),
            output: None,
        }
    }

    /// Creates a sink-like stage that completes when its input terminates.
    #[must_use]
    pub fn sink() -> Self {
        let mut stage = Self::manual();
        stage.auto_complete = true;
        stage
    }

    /// Creates a readable stage yielding `chunks`, completing when drained.
    #[must_use]
    pub fn source(chunks: Vec<bytes::Bytes>) -> Self {
        let mut stage = Self::manual();
        stage.output =
            Some(ByteStream::from_chunks(chunks).instrumented(stage.cell.clone()));
        stage
    }

    /// The shared release record.
    #[must_use]
    pub fn release_log(&self) -> ReleaseLog {
        self.log.clone()
    }

    /// The stage's completion cell, for firing the native close signal from
    /// a test.
    #[must_use]
    pub fn completion_cell(&self) -> CompletionCell {
        self.cell.clone()
    }
}

impl Stage for InstrumentedStage {
    fn attach_input(&mut self, mut input: ByteStream) {
        let cell = self.cell.clone();
        let auto_complete = self.auto_complete;
        // Drain so upstream backpressure never stalls a test.
        tokio::spawn(async move {
            while let Some(item) = input.next().await {
                if let Err(err) = item {
                    if auto_complete {
                        cell.complete(Some(err));
                    }
                    return;
                }
            }
            if auto_complete {
                cell.complete(None);
            }
        });
    }

    fn take_output(&mut self) -> ByteStream {
        self.output.take().unwrap_or_else(ByteStream::empty)
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn release_strategy(&self) -> ReleaseStrategy {
        self.strategy
    }

    fn close(&mut self) {
        self.log.inner.lock().close += 1;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }

    fn abort(&mut self) {
        self.log.inner.lock().abort += 1;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }

    fn destroy(&mut self) {
        self.log.inner.lock().destroy += 1;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}

/// A readable origin that yields `chunks`, then fails with `error`.
#[derive(Debug)]
pub struct FailingSource {
    output: Option<ByteStream>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
}

impl FailingSource {
    /// Creates the failing source.
    #[must_use]
    pub fn new(chunks: Vec<bytes::Bytes>, error: StreamTreeError) -> Self {
        let (cell, listener) = completion_pair();
        let good = futures::stream::iter(chunks.into_iter().map(Ok));
        let bad = futures::stream::iter([Err(error)]);
        Self {
            output: Some(ByteStream::new(good.chain(bad)).instrumented(cell.clone())),
            cell,
            listener: Some(listener),
        }
    }
}

impl Stage for FailingSource {
    fn attach_input(&mut self, _input: ByteStream) {}

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
