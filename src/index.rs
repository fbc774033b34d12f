//! Index structures behind the reader workspace.
//!
//! - [`segment`]: immutable, shareable segments of stored documents and postings
//! - [`reader`]: the [`reader::IndexReader`] handle trait and snapshot readers
//! - [`writer`]: the single writer, applying batches and committing to storage
//! - [`codec`]: the checksummed container every persisted file uses

pub mod codec;
pub mod reader;
pub mod segment;
pub mod writer;

pub use reader::{IndexReader, ReaderStats, SnapshotReader, SnapshotSource};
pub use segment::Segment;
pub use writer::{BatchResult, IndexOperation, IndexWriterHolder, WriterHolder};
