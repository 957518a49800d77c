//! # Streamtree
//!
//! Tree-shaped byte-stream pipelines with coordinated, exactly-once
//! teardown.
//!
//! A linear pipeline only needs "destroy everything when one link fails". A
//! tree — one source feeding several parallel consumers, or several
//! producers feeding one sink — needs a barrier: an internal node must stay
//! alive until *all* of its branches have finished, yet must be torn down
//! immediately when any descendant fails. Streamtree manages exactly that
//! lifecycle:
//!
//! - **Composition**: grow a tree with `pipe`, `split`, `pipe_from`,
//!   `join_readable`, and `join_writable` over any [`stage::Stage`]
//! - **Cleanup guards**: every stage is released at most once, through the
//!   most specific capability it declares (close, abort, or destroy)
//! - **Propagation**: errors fan out to descendants; completions collapse
//!   upward through the sibling barrier; the first error wins and reaches
//!   every completion callback exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use streamtree::prelude::*;
//!
//! // One source, two independent consumers.
//! let source = ChunkSource::single("payload");
//! let mut branches = ReadableTree::new(source).split2();
//!
//! let right = branches.pop().unwrap().finish();
//! let left = branches.pop().unwrap().finish_with(|err| {
//!     assert!(err.is_none());
//! });
//!
//! // Drive both branches; the source is released only after the last one.
//! let (a, b) = tokio::join!(left.collect_bytes(), right.collect_bytes());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod completion;
pub mod errors;
pub mod multi;
pub mod stage;
pub mod stream;
pub mod tee;
pub mod testing;
pub mod tree;
pub mod writer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::completion::{completion_pair, CompletionCallback, CompletionCell};
    pub use crate::errors::StreamTreeError;
    pub use crate::multi::MultiWriter;
    pub use crate::stage::{
        ChunkSource, CollectSink, MapStage, NullSink, PassThrough, ReleaseStrategy, Stage,
        StreamSource,
    };
    pub use crate::stream::{byte_channel, ByteStream, ByteWriter};
    pub use crate::tee::tee;
    pub use crate::tree::{ReadableTree, TreeConfig, WritableTree};
    pub use crate::writer::write_tree;
}
