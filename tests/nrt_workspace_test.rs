use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use sarissa_nrt::document::{Document, Term};
use sarissa_nrt::error::{NrtError, Result};
use sarissa_nrt::index::reader::{IndexReader, SnapshotReader};
use sarissa_nrt::index::writer::{IndexOperation, IndexWriterHolder, WriterHolder};
use sarissa_nrt::storage::file::FileStorageConfig;
use sarissa_nrt::storage::memory::MemoryStorage;
use sarissa_nrt::storage::{StorageConfig, StorageFactory};
use sarissa_nrt::workspace::{
    DirectoryReaderProvider, ErrorContext, ErrorHandler, LogErrorHandler, NrtWorkspace, Operation,
    ReaderProvider, WorkspaceConfig,
};
use tempfile::TempDir;

/// Error handler that keeps every report.
#[derive(Debug, Default)]
struct RecordingHandler {
    reports: Mutex<Vec<(Operation, String)>>,
}

impl RecordingHandler {
    fn operations(&self) -> Vec<Operation> {
        self.reports.lock().iter().map(|(op, _)| *op).collect()
    }
}

impl ErrorHandler for RecordingHandler {
    fn handle(&self, context: ErrorContext) {
        self.reports
            .lock()
            .push((context.operation, context.cause.to_string()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloneFailure {
    None,
    Corrupt,
    Io,
}

/// Knobs and counters shared by a mock writer and the readers it opens.
#[derive(Debug)]
struct MockControl {
    fail_close: AtomicBool,
    fail_nrt_open: AtomicBool,
    clone_failure: Mutex<CloneFailure>,
    generation: AtomicU64,
    nrt_opens: AtomicUsize,
    directory_opens: AtomicUsize,
    close_attempts: AtomicUsize,
}

impl Default for MockControl {
    fn default() -> Self {
        MockControl {
            fail_close: AtomicBool::new(false),
            fail_nrt_open: AtomicBool::new(false),
            clone_failure: Mutex::new(CloneFailure::None),
            generation: AtomicU64::new(0),
            nrt_opens: AtomicUsize::new(0),
            directory_opens: AtomicUsize::new(0),
            close_attempts: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug)]
struct MockReader {
    generation: u64,
    control: Arc<MockControl>,
    closed: bool,
}

impl IndexReader for MockReader {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn doc_count(&self) -> u64 {
        self.generation
    }

    fn max_doc(&self) -> u64 {
        self.generation
    }

    fn is_deleted(&self, doc_id: u64) -> bool {
        doc_id >= self.generation
    }

    fn document(&self, _doc_id: u64) -> Result<Option<Document>> {
        Ok(None)
    }

    fn term_docs(&self, _field: &str, _term: &str) -> Result<Vec<u64>> {
        Ok(Vec::new())
    }

    fn try_clone(&self) -> Result<Box<dyn IndexReader>> {
        match *self.control.clone_failure.lock() {
            CloneFailure::None => Ok(Box::new(MockReader {
                generation: self.generation,
                control: Arc::clone(&self.control),
                closed: false,
            })),
            CloneFailure::Corrupt => Err(NrtError::corrupt("checksum mismatch")),
            CloneFailure::Io => Err(NrtError::Io(std::io::Error::other("disk gone"))),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.control.close_attempts.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        if self.control.fail_close.load(Ordering::SeqCst) {
            return Err(NrtError::storage("close failed"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
struct MockWriter {
    control: Arc<MockControl>,
}

impl MockWriter {
    fn apply(&self) {
        self.control.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn reader(&self) -> Box<dyn IndexReader> {
        Box::new(MockReader {
            generation: self.control.generation.load(Ordering::SeqCst),
            control: Arc::clone(&self.control),
            closed: false,
        })
    }
}

impl WriterHolder for MockWriter {
    fn index_name(&self) -> &str {
        "mock"
    }

    fn open_nrt_reader(&self, _apply_deletions: bool) -> Result<Box<dyn IndexReader>> {
        if self.control.fail_nrt_open.load(Ordering::SeqCst) {
            return Err(NrtError::storage("writer unavailable"));
        }
        self.control.nrt_opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.reader())
    }

    fn open_directory_reader(&self) -> Result<Box<dyn IndexReader>> {
        self.control.directory_opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.reader())
    }
}

fn mock_workspace() -> (Arc<MockWriter>, Arc<RecordingHandler>, NrtWorkspace) {
    let writer = Arc::new(MockWriter::default());
    let handler = Arc::new(RecordingHandler::default());
    let workspace = NrtWorkspace::new(
        writer.clone(),
        handler.clone(),
        WorkspaceConfig::default(),
    );
    (writer, handler, workspace)
}

fn real_workspace(name: &str) -> (Arc<IndexWriterHolder>, NrtWorkspace) {
    let writer = Arc::new(IndexWriterHolder::open(name, Arc::new(MemoryStorage::default())).unwrap());
    let workspace = NrtWorkspace::new(
        writer.clone(),
        Arc::new(LogErrorHandler),
        WorkspaceConfig::default(),
    );
    (writer, workspace)
}

fn add(id: &str, title: &str) -> IndexOperation {
    IndexOperation::Add(
        Document::builder()
            .add_text("id", id)
            .add_text("title", title)
            .build(),
    )
}

#[test]
fn test_batches_supersede_reference_and_clones_stay_independent() {
    let (writer, workspace) = real_workspace("library");

    writer.apply_batch(&[add("1", "first edition")]).unwrap();
    workspace.after_transaction_applied().unwrap();

    let (first, second) = thread::scope(|scope| {
        let a = scope.spawn(|| workspace.acquire_reader().unwrap());
        let b = scope.spawn(|| workspace.acquire_reader().unwrap());
        (a.join().unwrap(), b.join().unwrap())
    });
    assert_eq!(first.generation(), 1);
    assert_eq!(second.generation(), 1);

    // Closing one clone leaves the other usable.
    workspace.release_reader(first);
    assert_eq!(second.term_doc_freq("title", "first").unwrap(), 1);

    writer
        .apply_batch(&[
            IndexOperation::Update {
                term: Term::new("id", "1"),
                document: Document::builder()
                    .add_text("id", "1")
                    .add_text("title", "second edition")
                    .build(),
            },
        ])
        .unwrap();
    workspace.after_transaction_applied().unwrap();

    let third = workspace.acquire_reader().unwrap();
    assert_eq!(third.generation(), 2);
    assert_eq!(third.doc_count(), 1);
    assert_eq!(third.term_doc_freq("title", "second").unwrap(), 1);
    assert_eq!(third.term_doc_freq("title", "first").unwrap(), 0);

    // The clone served before the batch still sees its own snapshot.
    assert_eq!(second.term_doc_freq("title", "first").unwrap(), 1);
    assert_eq!(second.term_doc_freq("title", "second").unwrap(), 0);

    workspace.release_reader(second);
    workspace.release_reader(third);
    // Only the current reference is left open.
    assert_eq!(writer.stats().open_handles(), 1);
}

#[test]
fn test_readers_never_observe_partial_batches() {
    let (writer, workspace) = real_workspace("concurrent");
    writer.apply_batch(&[add("0", "seed")]).unwrap();
    workspace.after_transaction_applied().unwrap();

    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut last_generation = 0;
                while !done.load(Ordering::SeqCst) {
                    let reader = workspace.acquire_reader().unwrap();
                    // Every batch adds two documents.
                    assert_eq!(reader.doc_count(), reader.generation() * 2 - 1);
                    assert!(reader.generation() >= last_generation);
                    last_generation = reader.generation();
                    workspace.release_reader(reader);
                }
            });
        }

        for batch in 1..50 {
            writer
                .apply_batch(&[
                    add(&format!("{batch}-a"), "pair"),
                    add(&format!("{batch}-b"), "pair"),
                ])
                .unwrap();
            workspace.after_transaction_applied().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });

    assert_eq!(workspace.reference_generation(), Some(50));
    assert_eq!(writer.stats().open_handles(), 1);
}

#[test]
fn test_refresh_is_visible_to_the_next_acquire() {
    let (writer, workspace) = real_workspace("visibility");
    for batch in 1..=10u64 {
        let result = writer
            .apply_batch(&[add(&batch.to_string(), "visible")])
            .unwrap();
        workspace.after_transaction_applied().unwrap();

        let reader = workspace.acquire_reader().unwrap();
        assert!(reader.generation() >= result.generation);
        assert_eq!(reader.term_doc_freq("title", "visible").unwrap(), batch);
        workspace.release_reader(reader);
    }
}

#[test]
fn test_concurrent_first_acquire_opens_storage_once() {
    let (writer, _handler, workspace) = mock_workspace();
    let threads = 8;
    let barrier = Barrier::new(threads);

    let readers: Vec<Box<dyn IndexReader>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    workspace.acquire_reader().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(readers.len(), threads);
    assert_eq!(writer.control.directory_opens.load(Ordering::SeqCst), 1);
    assert_eq!(writer.control.nrt_opens.load(Ordering::SeqCst), 0);
    for reader in readers {
        workspace.release_reader(reader);
    }
}

#[test]
fn test_concurrent_first_acquire_shares_one_snapshot() {
    let storage = Arc::new(MemoryStorage::default());
    {
        let writer = IndexWriterHolder::open("race", storage.clone()).unwrap();
        writer
            .apply_batch(&[add("doc-1", "committed"), add("doc-2", "committed")])
            .unwrap();
        writer.commit().unwrap();
    }
    let writer = Arc::new(IndexWriterHolder::open("race", storage).unwrap());
    let workspace = NrtWorkspace::new(
        writer.clone(),
        Arc::new(LogErrorHandler),
        WorkspaceConfig::default(),
    );

    let threads = 8;
    let barrier = Barrier::new(threads);
    let readers: Vec<Box<dyn IndexReader>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    workspace.acquire_reader().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(writer.stats().directory_opens(), 1);
    let first = readers[0]
        .as_any()
        .downcast_ref::<SnapshotReader>()
        .unwrap();
    for reader in &readers {
        let snapshot = reader.as_any().downcast_ref::<SnapshotReader>().unwrap();
        assert!(snapshot.shares_snapshot_with(first));
        assert_eq!(reader.generation(), 1);
        assert_eq!(reader.term_docs("id", "doc-2").unwrap().len(), 1);
    }
    // The reference plus one clone per caller.
    assert_eq!(first.open_handles(), threads + 1);

    for reader in readers {
        workspace.release_reader(reader);
    }
    assert_eq!(writer.stats().open_handles(), 1);
}

#[test]
fn test_lazy_init_reads_committed_state() {
    let storage = Arc::new(MemoryStorage::default());
    {
        let writer = IndexWriterHolder::open("lazy", storage.clone()).unwrap();
        writer.apply_batch(&[add("1", "committed")]).unwrap();
        writer.commit().unwrap();
        writer.apply_batch(&[add("2", "pending")]).unwrap();
    }

    let writer = Arc::new(IndexWriterHolder::open("lazy", storage).unwrap());
    let workspace = NrtWorkspace::new(
        writer.clone(),
        Arc::new(LogErrorHandler),
        WorkspaceConfig::default(),
    );
    let reader = workspace.acquire_reader().unwrap();
    assert_eq!(reader.doc_count(), 1);
    assert_eq!(reader.term_doc_freq("title", "committed").unwrap(), 1);
    assert_eq!(writer.stats().directory_opens(), 1);
    workspace.release_reader(reader);
}

#[test]
fn test_close_failures_are_reported_not_raised() {
    let (writer, handler, workspace) = mock_workspace();
    writer.apply();
    workspace.after_transaction_applied().unwrap();
    let served = workspace.acquire_reader().unwrap();

    writer.control.fail_close.store(true, Ordering::SeqCst);
    writer.apply();
    workspace.after_transaction_applied().unwrap();
    assert_eq!(workspace.reference_generation(), Some(2));

    workspace.release_reader(served);
    assert_eq!(
        handler.operations(),
        vec![Operation::CloseReferenceReader, Operation::CloseServedReader]
    );
    // Exactly one close attempt per handle, no retries.
    assert_eq!(writer.control.close_attempts.load(Ordering::SeqCst), 2);

    let reader = workspace.acquire_reader().unwrap();
    assert_eq!(reader.generation(), 2);
    workspace.release_reader(reader);
}

#[test]
fn test_clone_failures_carry_index_identity() {
    let (writer, _handler, workspace) = mock_workspace();
    writer.apply();
    workspace.after_transaction_applied().unwrap();

    *writer.control.clone_failure.lock() = CloneFailure::Corrupt;
    let err = workspace.acquire_reader().unwrap_err();
    assert!(matches!(err, NrtError::CorruptedIndex { .. }));
    assert!(err.is_corruption());
    assert_eq!(err.index_name(), Some("mock"));

    *writer.control.clone_failure.lock() = CloneFailure::Io;
    let err = workspace.acquire_reader().unwrap_err();
    assert!(matches!(err, NrtError::IndexAccess { .. }));
    assert!(!err.is_corruption());
    assert_eq!(err.index_name(), Some("mock"));

    // The reference itself is untouched.
    *writer.control.clone_failure.lock() = CloneFailure::None;
    let reader = workspace.acquire_reader().unwrap();
    assert_eq!(reader.generation(), 1);
    workspace.release_reader(reader);
}

#[test]
fn test_failed_refresh_keeps_previous_reference() {
    let (writer, handler, workspace) = mock_workspace();
    writer.apply();
    workspace.after_transaction_applied().unwrap();

    writer.control.fail_nrt_open.store(true, Ordering::SeqCst);
    writer.apply();
    let err = workspace.after_transaction_applied().unwrap_err();
    assert!(matches!(err, NrtError::IndexAccess { .. }));
    assert_eq!(workspace.reference_generation(), Some(1));
    assert!(handler.operations().is_empty());

    writer.control.fail_nrt_open.store(false, Ordering::SeqCst);
    workspace.after_transaction_applied().unwrap();
    assert_eq!(workspace.reference_generation(), Some(2));
}

#[test]
fn test_corrupted_segment_is_reported_as_corrupted_index() {
    let storage = Arc::new(MemoryStorage::default());
    let writer = Arc::new(IndexWriterHolder::open("damaged", storage.clone()).unwrap());
    writer.apply_batch(&[add("1", "intact")]).unwrap();
    writer.commit().unwrap();

    let mut data = sarissa_nrt::storage::read_all(storage.as_ref(), "_0.seg").unwrap();
    let middle = data.len() / 2;
    data[middle] ^= 0xFF;
    storage.overwrite("_0.seg", data);

    let workspace = NrtWorkspace::new(writer, Arc::new(LogErrorHandler), WorkspaceConfig::default());
    let err = workspace.acquire_reader().unwrap_err();
    assert!(matches!(err, NrtError::CorruptedIndex { ref index_name, .. } if index_name == "damaged"));
    assert_eq!(workspace.reference_generation(), None);
}

#[test]
fn test_refresh_after_close_releases_new_reader() {
    let (writer, workspace) = real_workspace("closing");
    writer.apply_batch(&[add("1", "before")]).unwrap();
    workspace.after_transaction_applied().unwrap();
    workspace.close();

    writer.apply_batch(&[add("2", "after")]).unwrap();
    assert!(matches!(
        workspace.after_transaction_applied().unwrap_err(),
        NrtError::AlreadyClosed(_)
    ));
    assert_eq!(writer.stats().open_handles(), 0);
    assert_eq!(writer.stats().nrt_opens(), 2);
}

#[test]
fn test_directory_provider_and_workspace_share_one_contract() {
    let (writer, workspace) = real_workspace("providers");
    let directory = DirectoryReaderProvider::new(writer.clone(), Arc::new(LogErrorHandler));

    writer.apply_batch(&[add("1", "fresh")]).unwrap();
    workspace.after_transaction_applied().unwrap();

    let providers: [(&dyn ReaderProvider, u64); 2] = [(&workspace, 1), (&directory, 0)];
    for (provider, expected) in providers {
        let reader = provider.acquire_reader().unwrap();
        assert_eq!(reader.doc_count(), expected);
        provider.release_reader(reader);
    }
}

#[test]
fn test_file_storage_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::File(FileStorageConfig::new(temp_dir.path()));

    {
        let storage = StorageFactory::create(config.clone()).unwrap();
        let writer = Arc::new(IndexWriterHolder::open("on-disk", storage).unwrap());
        let workspace = NrtWorkspace::new(
            writer.clone(),
            Arc::new(LogErrorHandler),
            WorkspaceConfig::default(),
        );
        writer
            .apply_batch(&[add("1", "durable"), add("2", "durable")])
            .unwrap();
        workspace.after_transaction_applied().unwrap();
        writer
            .apply_batch(&[IndexOperation::Delete(Term::new("id", "2"))])
            .unwrap();
        workspace.after_transaction_applied().unwrap();
        writer.commit().unwrap();
        workspace.close();
    }

    let storage = StorageFactory::create(config).unwrap();
    let writer = Arc::new(IndexWriterHolder::open("on-disk", storage).unwrap());
    assert_eq!(writer.generation(), 2);
    let workspace = NrtWorkspace::new(
        writer.clone(),
        Arc::new(LogErrorHandler),
        WorkspaceConfig::default(),
    );
    let reader = workspace.acquire_reader().unwrap();
    assert_eq!(reader.doc_count(), 1);
    assert_eq!(reader.term_doc_freq("title", "durable").unwrap(), 1);
    workspace.release_reader(reader);
}
