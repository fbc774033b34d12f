//! Near-real-time reader workspace.
//!
//! The workspace keeps one *reference* reader, opened from the writer each
//! time a batch has been applied, so it only ever sees whole batches. The
//! reference is never handed out: every caller gets its own clone, which
//! shares the segment data but can be closed independently.
//!
//! ```text
//! batch applied ──> open NRT reader ──> swap slot (write lock) ──> close old
//! acquire_reader ──> read lock ──> [slot empty? write lock, re-check,
//!                                   open from storage, downgrade] ──> clone
//! ```
//!
//! Readers that were handed out before a swap keep working on the snapshot
//! they were cloned from; the superseded reference itself is closed right
//! after the swap.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::error::{NrtError, Result};
use crate::index::reader::IndexReader;
use crate::index::writer::WriterHolder;
use crate::workspace::config::WorkspaceConfig;
use crate::workspace::error_handler::{ErrorHandler, Operation};
use crate::workspace::provider::{ReaderProvider, close_reporting};

/// State of the reference reader slot.
#[derive(Debug)]
enum ReferenceSlot {
    /// No batch applied and no reader requested yet.
    Uninitialized,
    /// The current reference reader.
    Active(Box<dyn IndexReader>),
    /// The workspace was closed.
    ShutDown,
}

/// Reader workspace serving near-real-time clones of a cached reference reader.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use sarissa_nrt::document::Document;
/// use sarissa_nrt::index::writer::{IndexOperation, IndexWriterHolder};
/// use sarissa_nrt::storage::memory::MemoryStorage;
/// use sarissa_nrt::workspace::{LogErrorHandler, NrtWorkspace, WorkspaceConfig};
///
/// # fn main() -> sarissa_nrt::error::Result<()> {
/// let writer = Arc::new(IndexWriterHolder::open("books", Arc::new(MemoryStorage::default()))?);
/// let workspace = NrtWorkspace::new(
///     writer.clone(),
///     Arc::new(LogErrorHandler),
///     WorkspaceConfig::default(),
/// );
///
/// writer.apply_batch(&[IndexOperation::Add(
///     Document::builder().add_text("title", "Dune").build(),
/// )])?;
/// workspace.after_transaction_applied()?;
///
/// let reader = workspace.acquire_reader()?;
/// assert_eq!(reader.term_doc_freq("title", "dune")?, 1);
/// workspace.release_reader(reader);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct NrtWorkspace {
    index_name: String,
    writer: Arc<dyn WriterHolder>,
    error_handler: Arc<dyn ErrorHandler>,
    config: WorkspaceConfig,
    reference: RwLock<ReferenceSlot>,
    // Serializes refreshes so an older snapshot never replaces a newer one.
    refresh_lock: Mutex<()>,
}

impl NrtWorkspace {
    /// Create a workspace over `writer`.
    pub fn new(
        writer: Arc<dyn WriterHolder>,
        error_handler: Arc<dyn ErrorHandler>,
        config: WorkspaceConfig,
    ) -> Self {
        NrtWorkspace {
            index_name: writer.index_name().to_string(),
            writer,
            error_handler,
            config,
            reference: RwLock::new(ReferenceSlot::Uninitialized),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Name of the index served by this workspace.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// The settings this workspace was created with.
    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Refresh the reference reader after a batch has been applied.
    ///
    /// Must be called once per successfully applied batch. When it returns
    /// `Ok`, every later [`NrtWorkspace::acquire_reader`] observes the batch.
    /// Failing to close the superseded reference is reported to the error
    /// handler and does not fail the refresh.
    pub fn after_transaction_applied(&self) -> Result<()> {
        let refresh = self.refresh_lock.lock();

        let new_reader = self
            .writer
            .open_nrt_reader(self.config.apply_deletions)
            .map_err(|e| e.on_index(&self.index_name))?;
        let generation = new_reader.generation();

        let previous = {
            let mut slot = self.reference.write();
            if matches!(*slot, ReferenceSlot::ShutDown) {
                drop(slot);
                drop(refresh);
                self.close_reader(new_reader, Operation::CloseReferenceReader);
                return Err(self.closed_error());
            }
            std::mem::replace(&mut *slot, ReferenceSlot::Active(new_reader))
        };
        drop(refresh);

        tracing::debug!(
            index = %self.index_name,
            generation,
            "swapped reference reader"
        );

        if let ReferenceSlot::Active(old_reader) = previous {
            self.close_reader(old_reader, Operation::CloseReferenceReader);
        }
        Ok(())
    }

    /// Get a new reader over the current reference snapshot.
    ///
    /// The first call before any batch opens the reference from storage;
    /// concurrent first callers share that single open.
    pub fn acquire_reader(&self) -> Result<Box<dyn IndexReader>> {
        {
            let slot = self.reference.read();
            match &*slot {
                ReferenceSlot::Active(reference) => return self.clone_reader(reference.as_ref()),
                ReferenceSlot::ShutDown => return Err(self.closed_error()),
                ReferenceSlot::Uninitialized => {}
            }
        }

        let mut slot = self.reference.write();
        if matches!(*slot, ReferenceSlot::Uninitialized) {
            let reader = self
                .writer
                .open_directory_reader()
                .map_err(|e| e.on_index(&self.index_name))?;
            tracing::debug!(
                index = %self.index_name,
                generation = reader.generation(),
                "initialized reference reader from storage"
            );
            *slot = ReferenceSlot::Active(reader);
        }

        let slot = RwLockWriteGuard::downgrade(slot);
        match &*slot {
            ReferenceSlot::Active(reference) => self.clone_reader(reference.as_ref()),
            ReferenceSlot::ShutDown => Err(self.closed_error()),
            ReferenceSlot::Uninitialized => Err(NrtError::other(format!(
                "reference reader of index '{}' missing after initialization",
                self.index_name
            ))),
        }
    }

    /// Close a reader obtained from [`NrtWorkspace::acquire_reader`].
    ///
    /// Close failures are reported to the error handler and swallowed.
    pub fn release_reader(&self, reader: Box<dyn IndexReader>) {
        self.close_reader(reader, Operation::CloseServedReader);
    }

    /// Close the workspace and its reference reader.
    ///
    /// Readers already handed out stay valid until released. Calling this
    /// more than once is a no-op.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.reference.write(), ReferenceSlot::ShutDown);
        match previous {
            ReferenceSlot::Active(reader) => {
                self.close_reader(reader, Operation::Shutdown);
                tracing::debug!(index = %self.index_name, "closed reader workspace");
            }
            ReferenceSlot::Uninitialized => {
                tracing::debug!(index = %self.index_name, "closed reader workspace");
            }
            ReferenceSlot::ShutDown => {}
        }
    }

    /// Whether [`NrtWorkspace::close`] was called.
    pub fn is_closed(&self) -> bool {
        matches!(*self.reference.read(), ReferenceSlot::ShutDown)
    }

    /// Generation of the current reference reader, if one is cached.
    pub fn reference_generation(&self) -> Option<u64> {
        match &*self.reference.read() {
            ReferenceSlot::Active(reference) => Some(reference.generation()),
            _ => None,
        }
    }

    fn clone_reader(&self, reference: &dyn IndexReader) -> Result<Box<dyn IndexReader>> {
        reference
            .try_clone()
            .map_err(|e| e.on_index(&self.index_name))
    }

    fn close_reader(&self, reader: Box<dyn IndexReader>, operation: Operation) {
        close_reporting(
            reader,
            operation,
            &self.index_name,
            self.error_handler.as_ref(),
        );
    }

    fn closed_error(&self) -> NrtError {
        NrtError::already_closed(format!("reader workspace of index '{}'", self.index_name))
    }
}

impl ReaderProvider for NrtWorkspace {
    fn acquire_reader(&self) -> Result<Box<dyn IndexReader>> {
        NrtWorkspace::acquire_reader(self)
    }

    fn release_reader(&self, reader: Box<dyn IndexReader>) {
        NrtWorkspace::release_reader(self, reader)
    }
}

impl Drop for NrtWorkspace {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Term};
    use crate::index::writer::{IndexOperation, IndexWriterHolder};
    use crate::storage::memory::MemoryStorage;
    use crate::workspace::error_handler::LogErrorHandler;

    fn setup() -> (Arc<IndexWriterHolder>, NrtWorkspace) {
        let writer = Arc::new(
            IndexWriterHolder::open("unit", Arc::new(MemoryStorage::default())).unwrap(),
        );
        let workspace = NrtWorkspace::new(
            writer.clone(),
            Arc::new(LogErrorHandler),
            WorkspaceConfig::default(),
        );
        (writer, workspace)
    }

    fn add(writer: &IndexWriterHolder, id: &str) {
        writer
            .apply_batch(&[IndexOperation::Add(
                Document::builder().add_text("id", id).build(),
            )])
            .unwrap();
    }

    #[test]
    fn test_lazy_init_uses_storage() {
        let (writer, workspace) = setup();
        assert_eq!(workspace.reference_generation(), None);

        let reader = workspace.acquire_reader().unwrap();
        assert_eq!(reader.generation(), 0);
        assert_eq!(writer.stats().directory_opens(), 1);
        assert_eq!(workspace.reference_generation(), Some(0));
        workspace.release_reader(reader);

        let reader = workspace.acquire_reader().unwrap();
        assert_eq!(writer.stats().directory_opens(), 1);
        workspace.release_reader(reader);
    }

    #[test]
    fn test_swap_replaces_and_closes_reference() {
        let (writer, workspace) = setup();
        add(&writer, "1");
        workspace.after_transaction_applied().unwrap();
        assert_eq!(workspace.reference_generation(), Some(1));
        assert_eq!(writer.stats().open_handles(), 1);

        let served = workspace.acquire_reader().unwrap();
        add(&writer, "2");
        workspace.after_transaction_applied().unwrap();

        // New reference plus the still-open served clone of the old one.
        assert_eq!(writer.stats().open_handles(), 2);
        assert_eq!(served.generation(), 1);
        assert_eq!(served.doc_count(), 1);

        let fresh = workspace.acquire_reader().unwrap();
        assert_eq!(fresh.doc_count(), 2);

        workspace.release_reader(served);
        workspace.release_reader(fresh);
        assert_eq!(writer.stats().open_handles(), 1);
        assert_eq!(writer.stats().snapshots_released(), 1);
    }

    #[test]
    fn test_apply_deletions_config() {
        let writer = Arc::new(
            IndexWriterHolder::open("unit", Arc::new(MemoryStorage::default())).unwrap(),
        );
        let config = WorkspaceConfig {
            apply_deletions: false,
            ..WorkspaceConfig::default()
        };
        let workspace = NrtWorkspace::new(writer.clone(), Arc::new(LogErrorHandler), config);

        add(&writer, "1");
        workspace.after_transaction_applied().unwrap();
        writer
            .apply_batch(&[IndexOperation::Delete(Term::new("id", "1"))])
            .unwrap();
        workspace.after_transaction_applied().unwrap();

        let reader = workspace.acquire_reader().unwrap();
        assert_eq!(reader.doc_count(), 1);
        assert_eq!(writer.pending_delete_count(), 1);
        workspace.release_reader(reader);
    }

    #[test]
    fn test_close_is_terminal() {
        let (writer, workspace) = setup();
        add(&writer, "1");
        workspace.after_transaction_applied().unwrap();
        let served = workspace.acquire_reader().unwrap();

        workspace.close();
        workspace.close();
        assert!(workspace.is_closed());
        assert!(matches!(
            workspace.acquire_reader().unwrap_err(),
            NrtError::AlreadyClosed(_)
        ));

        add(&writer, "2");
        assert!(workspace.after_transaction_applied().is_err());
        assert_eq!(served.doc_count(), 1);
        workspace.release_reader(served);
        assert_eq!(writer.stats().open_handles(), 0);
    }
}
