//! The write-batch backend.
//!
//! [`IndexBackend`] ties the single writer to its near-real-time workspace:
//! each successfully applied batch is followed by exactly one
//! [`NrtWorkspace::after_transaction_applied`] call, in batch order. Batches
//! can be applied synchronously or handed to a [`queue::BatchQueue`] that
//! runs them on a dedicated writer thread.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{NrtError, Result};
use crate::index::writer::{BatchResult, IndexOperation, IndexWriterHolder};
use crate::storage::{StorageConfig, StorageFactory};
use crate::workspace::config::WorkspaceConfig;
use crate::workspace::error_handler::{ErrorContext, ErrorHandler, LogErrorHandler, Operation};
use crate::workspace::nrt::NrtWorkspace;
use crate::workspace::provider::ReaderProvider;

pub mod queue;

pub use queue::BatchQueue;

/// Bookkeeping guarded by the batch lock.
#[derive(Debug, Default)]
struct BatchState {
    since_commit: u32,
    closed: bool,
}

/// Applies batches and keeps the reader workspace in step with the writer.
///
/// # Example
///
/// ```
/// use sarissa_nrt::backend::IndexBackend;
/// use sarissa_nrt::document::Document;
/// use sarissa_nrt::index::writer::IndexOperation;
/// use sarissa_nrt::storage::StorageConfig;
/// use sarissa_nrt::workspace::{ReaderProvider, WorkspaceConfig};
///
/// # fn main() -> sarissa_nrt::error::Result<()> {
/// let backend = IndexBackend::open("books", StorageConfig::default(), WorkspaceConfig::default())?;
/// backend.apply_batch(&[IndexOperation::Add(
///     Document::builder().add_text("title", "Neuromancer").build(),
/// )])?;
///
/// let provider = backend.reader_provider();
/// let reader = provider.acquire_reader()?;
/// assert_eq!(reader.doc_count(), 1);
/// provider.release_reader(reader);
/// backend.close();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct IndexBackend {
    writer: Arc<IndexWriterHolder>,
    workspace: Arc<NrtWorkspace>,
    error_handler: Arc<dyn ErrorHandler>,
    config: WorkspaceConfig,
    state: Mutex<BatchState>,
}

impl IndexBackend {
    /// Create a backend over an existing writer.
    pub fn new(
        writer: Arc<IndexWriterHolder>,
        config: WorkspaceConfig,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        let workspace = Arc::new(NrtWorkspace::new(
            writer.clone(),
            Arc::clone(&error_handler),
            config.clone(),
        ));
        IndexBackend {
            writer,
            workspace,
            error_handler,
            config,
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Create storage from `storage_config`, open a writer on it and wrap it
    /// in a backend that logs reported errors.
    pub fn open(
        index_name: impl Into<String>,
        storage_config: StorageConfig,
        config: WorkspaceConfig,
    ) -> Result<Self> {
        let storage = StorageFactory::create(storage_config)?;
        let writer = Arc::new(IndexWriterHolder::open(index_name, storage)?);
        Ok(Self::new(writer, config, Arc::new(LogErrorHandler)))
    }

    /// Apply one batch and refresh the workspace.
    ///
    /// Returns an error only if the batch itself was rejected, in which case
    /// nothing changed and the workspace is not notified. Failures after the
    /// batch was applied (automatic commit, reader refresh) are reported to
    /// the error handler.
    pub fn apply_batch(&self, operations: &[IndexOperation]) -> Result<BatchResult> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NrtError::already_closed(format!(
                "backend of index '{}'",
                self.workspace.index_name()
            )));
        }

        let result = self.writer.apply_batch(operations)?;

        state.since_commit += 1;
        if self.config.commit_interval > 0 && state.since_commit >= self.config.commit_interval {
            match self.writer.commit() {
                Ok(_) => state.since_commit = 0,
                Err(e) => self.report(Operation::Commit, e),
            }
        }

        if let Err(e) = self.workspace.after_transaction_applied() {
            self.report(Operation::RefreshReference, e);
        }
        Ok(result)
    }

    /// Commit everything applied so far.
    pub fn commit(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let generation = self.writer.commit()?;
        state.since_commit = 0;
        Ok(generation)
    }

    /// The writer behind this backend.
    pub fn writer(&self) -> &Arc<IndexWriterHolder> {
        &self.writer
    }

    /// The near-real-time workspace fed by this backend.
    pub fn workspace(&self) -> &Arc<NrtWorkspace> {
        &self.workspace
    }

    /// The workspace as the provider query execution uses.
    pub fn reader_provider(&self) -> Arc<dyn ReaderProvider> {
        self.workspace.clone()
    }

    /// Commit, then close the workspace and the writer.
    ///
    /// Failures are reported, not returned. Calling this more than once is a
    /// no-op.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        if let Err(e) = self.writer.commit() {
            self.report(Operation::Shutdown, e);
        }
        self.workspace.close();
        self.writer.close();
        tracing::debug!(index = %self.workspace.index_name(), "closed index backend");
    }

    /// Whether [`IndexBackend::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn report(&self, operation: Operation, cause: NrtError) {
        self.error_handler.handle(ErrorContext::new(
            operation,
            self.workspace.index_name(),
            cause,
        ));
    }
}
