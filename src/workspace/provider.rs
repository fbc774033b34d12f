//! The reader contract exposed to query execution.

use std::sync::Arc;

use crate::error::Result;
use crate::index::reader::IndexReader;
use crate::index::writer::WriterHolder;
use crate::workspace::error_handler::{ErrorContext, ErrorHandler, Operation};

/// Hands out readers to query execution.
///
/// Every reader returned by [`ReaderProvider::acquire_reader`] belongs to the
/// caller and must be given back through [`ReaderProvider::release_reader`].
pub trait ReaderProvider: Send + Sync + std::fmt::Debug {
    /// Get a reader over a consistent view of the index.
    fn acquire_reader(&self) -> Result<Box<dyn IndexReader>>;

    /// Release a reader obtained from [`ReaderProvider::acquire_reader`].
    ///
    /// Never fails: close errors are reported, not returned.
    fn release_reader(&self, reader: Box<dyn IndexReader>);
}

/// Close `reader`, reporting a failure instead of returning it.
pub(crate) fn close_reporting(
    mut reader: Box<dyn IndexReader>,
    operation: Operation,
    index_name: &str,
    error_handler: &dyn ErrorHandler,
) {
    if let Err(e) = reader.close() {
        error_handler.handle(ErrorContext::new(operation, index_name, e));
    }
}

/// A provider without caching: every request opens a fresh reader over the
/// last commit in storage.
///
/// Readers see only committed data, which makes this provider suitable for
/// consumers that must never observe uncommitted batches.
#[derive(Debug)]
pub struct DirectoryReaderProvider {
    writer: Arc<dyn WriterHolder>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl DirectoryReaderProvider {
    /// Create a provider over `writer`'s storage.
    pub fn new(writer: Arc<dyn WriterHolder>, error_handler: Arc<dyn ErrorHandler>) -> Self {
        DirectoryReaderProvider {
            writer,
            error_handler,
        }
    }
}

impl ReaderProvider for DirectoryReaderProvider {
    fn acquire_reader(&self) -> Result<Box<dyn IndexReader>> {
        self.writer
            .open_directory_reader()
            .map_err(|e| e.on_index(self.writer.index_name()))
    }

    fn release_reader(&self, reader: Box<dyn IndexReader>) {
        close_reporting(
            reader,
            Operation::CloseServedReader,
            self.writer.index_name(),
            self.error_handler.as_ref(),
        );
    }
}
