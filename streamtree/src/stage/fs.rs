//! Descriptor-backed stages.
//!
//! File stages declare [`ReleaseStrategy::Close`]: a forced release drops
//! the descriptor instead of running the generic destroy path, so an
//! abandoned branch never leaks an open file.

use futures::StreamExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::completion::{completion_pair, CompletionCell, CompletionListener};
use crate::errors::StreamTreeError;
use crate::stage::{ReleaseStrategy, Stage};
use crate::stream::ByteStream;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A readable origin streaming a file's contents.
#[derive(Debug)]
pub struct FileSource {
    output: Option<ByteStream>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
}

impl FileSource {
    /// Opens `path` for streaming reads.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StreamTreeError> {
        let file = tokio::fs::File::open(path).await?;
        let (cell, listener) = completion_pair();
        let chunks = ReaderStream::with_capacity(file, READ_CHUNK_SIZE)
            .map(|item| item.map_err(StreamTreeError::from));
        Ok(Self {
            output: Some(ByteStream::new(chunks).instrumented(cell.clone())),
            cell,
            listener: Some(listener),
        })
    }
}

impl Stage for FileSource {
    fn attach_input(&mut self, _input: ByteStream) {
        tracing::trace!("file source ignores attached input");
    }

    fn take_output(&mut self) -> ByteStream {
        self.output.take().unwrap_or_else(ByteStream::empty)
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn release_strategy(&self) -> ReleaseStrategy {
        ReleaseStrategy::Close
    }

    fn close(&mut self) {
        // Dropping the stream drops the descriptor it owns.
        self.output = None;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}

/// A writable terminal streaming every input byte into a file.
#[derive(Debug)]
pub struct FileSink {
    file: Option<tokio::fs::File>,
    cell: CompletionCell,
    listener: Option<CompletionListener>,
    stop: Arc<AtomicBool>,
}

impl FileSink {
    /// Creates (or truncates) `path` for streaming writes.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be created.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, StreamTreeError> {
        let file = tokio::fs::File::create(path).await?;
        let (cell, listener) = completion_pair();
        Ok(Self {
            file: Some(file),
            cell,
            listener: Some(listener),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Stage for FileSink {
    fn attach_input(&mut self, mut input: ByteStream) {
        let Some(mut file) = self.file.take() else {
            return;
        };
        let cell = self.cell.clone();
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            while let Some(item) = input.next().await {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                match item {
                    Ok(chunk) => {
                        if let Err(err) = file.write_all(&chunk).await {
                            cell.complete(Some(err.into()));
                            return;
                        }
                    }
                    Err(err) => {
                        cell.complete(Some(err));
                        return;
                    }
                }
            }
            match file.flush().await {
                Ok(()) => cell.complete(None),
                Err(err) => cell.complete(Some(err.into())),
            }
        });
    }

    fn take_output(&mut self) -> ByteStream {
        ByteStream::empty()
    }

    fn take_completion(&mut self) -> Option<CompletionListener> {
        self.listener.take()
    }

    fn release_strategy(&self) -> ReleaseStrategy {
        ReleaseStrategy::Close
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.file = None;
        self.cell.complete(Some(StreamTreeError::Destroyed));
    }
}
