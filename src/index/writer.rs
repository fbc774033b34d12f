//! The index writer holder.
//!
//! [`WriterHolder`] is the contract the workspace needs from the write side:
//! open a near-real-time reader over the applied (not necessarily committed)
//! state, or open a reader over the last commit in storage.
//!
//! [`IndexWriterHolder`] is the single writer of an index. It applies batches
//! of [`IndexOperation`]s atomically, flushes every batch into a new
//! immutable segment, buffers deletes against older segments until they are
//! needed, and persists segments plus a commit point on [`IndexWriterHolder::commit`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use sarissa_nrt::document::{Document, Term};
//! use sarissa_nrt::index::writer::{IndexOperation, IndexWriterHolder, WriterHolder};
//! use sarissa_nrt::storage::memory::MemoryStorage;
//!
//! # fn main() -> sarissa_nrt::error::Result<()> {
//! let writer = IndexWriterHolder::open("books", Arc::new(MemoryStorage::default()))?;
//! writer.apply_batch(&[IndexOperation::Add(
//!     Document::builder().add_text("id", "1").add_text("title", "Dune").build(),
//! )])?;
//!
//! // Visible without a commit...
//! let nrt = writer.open_nrt_reader(true)?;
//! assert_eq!(nrt.term_doc_freq("title", "dune")?, 1);
//!
//! // ...but not durable yet.
//! assert_eq!(writer.open_directory_reader()?.doc_count(), 0);
//! writer.commit()?;
//! assert_eq!(writer.open_directory_reader()?.doc_count(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bit_vec::BitVec;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{Document, Term};
use crate::error::{NrtError, Result};
use crate::index::codec;
use crate::index::reader::{IndexReader, ReaderStats, SegmentView, SnapshotReader, SnapshotSource};
use crate::index::segment::{self, Segment};
use crate::storage::{self, Storage};

/// Prefix of commit point files (`segments_<generation>`).
pub const COMMIT_PREFIX: &str = "segments_";

/// The write side of an index, as seen by reader workspaces.
pub trait WriterHolder: Send + Sync + std::fmt::Debug {
    /// Name of the index, used for diagnostics.
    fn index_name(&self) -> &str;

    /// Open a reader over the writer's applied state without committing.
    ///
    /// With `apply_deletions` set, deletes buffered by earlier batches are
    /// resolved first; otherwise they may not be visible yet.
    fn open_nrt_reader(&self, apply_deletions: bool) -> Result<Box<dyn IndexReader>>;

    /// Open a reader over the last commit point in storage.
    fn open_directory_reader(&self) -> Result<Box<dyn IndexReader>>;
}

/// A single change inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOperation {
    /// Add a document.
    Add(Document),
    /// Delete every document matching `term`, then add `document`.
    Update { term: Term, document: Document },
    /// Delete every document matching the term.
    Delete(Term),
}

impl IndexOperation {
    fn validate(&self) -> Result<()> {
        match self {
            IndexOperation::Add(document) => Self::validate_document(document),
            IndexOperation::Update { term, document } => {
                Self::validate_term(term)?;
                Self::validate_document(document)
            }
            IndexOperation::Delete(term) => Self::validate_term(term),
        }
    }

    fn validate_document(document: &Document) -> Result<()> {
        if document.is_empty() {
            return Err(NrtError::index("Cannot index a document without fields"));
        }
        if document.fields().any(|(name, _)| name.is_empty()) {
            return Err(NrtError::index("Field names must not be empty"));
        }
        Ok(())
    }

    fn validate_term(term: &Term) -> Result<()> {
        if term.field.is_empty() {
            return Err(NrtError::index(format!(
                "Delete term '{}' has an empty field name",
                term.text
            )));
        }
        Ok(())
    }
}

/// Outcome of [`IndexWriterHolder::apply_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Writer generation after the batch.
    pub generation: u64,
    /// Documents flushed into the new segment.
    pub documents_added: u64,
    /// Deletes buffered against earlier segments.
    pub deletes_buffered: u64,
}

/// Persisted description of a committed segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedSegment {
    /// Segment name.
    pub name: String,
    /// Number of documents in the segment.
    pub max_doc: u32,
    /// Deleted local doc ids.
    pub deleted: Vec<u32>,
}

/// Persisted description of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPoint {
    /// Writer generation at commit time.
    pub generation: u64,
    /// Segments, in doc-id order.
    pub segments: Vec<CommittedSegment>,
}

impl CommitPoint {
    /// File name of this commit point.
    pub fn file_name(&self) -> String {
        format!("{COMMIT_PREFIX}{}", self.generation)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(codec::encode(&serde_json::to_vec(self)?))
    }

    fn decode(file_name: &str, data: &[u8]) -> Result<Self> {
        let payload = codec::decode(file_name, data)?;
        serde_json::from_slice(payload)
            .map_err(|e| NrtError::corrupt(format!("{file_name}: unreadable commit point: {e}")))
    }
}

/// Find and load the newest commit point in `storage`.
pub fn read_latest_commit(storage: &dyn Storage) -> Result<Option<CommitPoint>> {
    let latest = storage
        .list_files()?
        .into_iter()
        .filter_map(|name| commit_generation(&name).map(|generation| (generation, name)))
        .max_by_key(|(generation, _)| *generation);

    match latest {
        Some((_, name)) => {
            let data = storage::read_all(storage, &name)?;
            CommitPoint::decode(&name, &data).map(Some)
        }
        None => Ok(None),
    }
}

fn commit_generation(file_name: &str) -> Option<u64> {
    file_name.strip_prefix(COMMIT_PREFIX)?.parse().ok()
}

fn segment_number(name: &str) -> Option<u64> {
    name.strip_prefix('_')?.parse().ok()
}

/// Load the segments of `commit` from storage, verifying them against it.
fn load_commit(storage: &dyn Storage, commit: &CommitPoint) -> Result<Vec<SegmentView>> {
    commit
        .segments
        .iter()
        .map(|committed| {
            let file_name = segment::file_name(&committed.name);
            let data = storage::read_all(storage, &file_name)?;
            let segment = Segment::decode(&file_name, &data)?;
            if segment.max_doc() != committed.max_doc {
                return Err(NrtError::corrupt(format!(
                    "{file_name}: expected {} documents, found {}",
                    committed.max_doc,
                    segment.max_doc()
                )));
            }

            let mut live_docs = BitVec::from_elem(committed.max_doc as usize, true);
            for local_id in &committed.deleted {
                if *local_id >= committed.max_doc {
                    return Err(NrtError::corrupt(format!(
                        "{file_name}: deleted doc {local_id} out of range"
                    )));
                }
                live_docs.set(*local_id as usize, false);
            }

            Ok(SegmentView {
                segment: Arc::new(segment),
                live_docs: Arc::new(live_docs),
            })
        })
        .collect()
}

#[derive(Debug)]
struct SegmentEntry {
    view: SegmentView,
    persisted: bool,
}

/// A delete that applies to the first `segment_limit` segments only.
#[derive(Debug, Clone)]
struct PendingDelete {
    term: Term,
    segment_limit: usize,
}

#[derive(Debug, Default)]
struct WriterState {
    segments: Vec<SegmentEntry>,
    pending_deletes: Vec<PendingDelete>,
    generation: u64,
    committed_generation: u64,
    next_segment: u64,
    closed: bool,
}

impl WriterState {
    /// Apply buffered deletes to the live-doc bitsets.
    ///
    /// Bitsets are copy-on-write: readers that already hold the previous
    /// `Arc<BitVec>` keep seeing the old deletions.
    fn resolve_deletes(&mut self) -> u64 {
        let mut deleted = 0u64;
        for pending in self.pending_deletes.drain(..) {
            let limit = pending.segment_limit.min(self.segments.len());
            for entry in &mut self.segments[..limit] {
                let matches: Vec<u32> = entry
                    .view
                    .segment
                    .postings(&pending.term.field, &pending.term.text)
                    .iter()
                    .copied()
                    .filter(|local_id| entry.view.live_docs.get(*local_id as usize) == Some(true))
                    .collect();
                if matches.is_empty() {
                    continue;
                }
                let live_docs = Arc::make_mut(&mut entry.view.live_docs);
                for local_id in matches {
                    live_docs.set(local_id as usize, false);
                    deleted += 1;
                }
            }
        }
        deleted
    }

    fn views(&self) -> Vec<SegmentView> {
        self.segments.iter().map(|entry| entry.view.clone()).collect()
    }

    fn commit_point(&self) -> CommitPoint {
        CommitPoint {
            generation: self.generation,
            segments: self
                .segments
                .iter()
                .map(|entry| CommittedSegment {
                    name: entry.view.segment.name().to_string(),
                    max_doc: entry.view.segment.max_doc(),
                    deleted: entry
                        .view
                        .live_docs
                        .iter()
                        .enumerate()
                        .filter(|(_, live)| !live)
                        .map(|(local_id, _)| local_id as u32)
                        .collect(),
                })
                .collect(),
        }
    }
}

/// The single writer of an index.
#[derive(Debug)]
pub struct IndexWriterHolder {
    index_name: String,
    storage: Arc<dyn Storage>,
    state: Mutex<WriterState>,
    stats: Arc<ReaderStats>,
}

impl IndexWriterHolder {
    /// Open a writer over `storage`, resuming from its last commit if any.
    pub fn open(index_name: impl Into<String>, storage: Arc<dyn Storage>) -> Result<Self> {
        let index_name = index_name.into();
        let mut state = WriterState::default();

        if let Some(commit) = read_latest_commit(storage.as_ref())? {
            let views = load_commit(storage.as_ref(), &commit)?;
            state.next_segment = commit
                .segments
                .iter()
                .filter_map(|committed| segment_number(&committed.name))
                .max()
                .map_or(0, |max| max + 1);
            state.segments = views
                .into_iter()
                .map(|view| SegmentEntry {
                    view,
                    persisted: true,
                })
                .collect();
            state.generation = commit.generation;
            state.committed_generation = commit.generation;
            tracing::debug!(
                index = %index_name,
                generation = commit.generation,
                segments = state.segments.len(),
                "resumed index from commit point"
            );
        }

        Ok(IndexWriterHolder {
            index_name,
            storage,
            state: Mutex::new(state),
            stats: Arc::new(ReaderStats::new()),
        })
    }

    /// Apply a batch of operations atomically.
    ///
    /// Either every operation is applied or, if any is invalid, none is. A
    /// delete affects documents added earlier in the same batch and documents
    /// of existing segments, never documents added after it.
    pub fn apply_batch(&self, operations: &[IndexOperation]) -> Result<BatchResult> {
        for operation in operations {
            operation.validate()?;
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(NrtError::already_closed(format!(
                "writer of index '{}'",
                self.index_name
            )));
        }

        let segment_limit = state.segments.len();
        let mut buffer: Vec<Document> = Vec::new();
        let mut deletes: Vec<PendingDelete> = Vec::new();
        for operation in operations {
            match operation {
                IndexOperation::Add(document) => buffer.push(document.clone()),
                IndexOperation::Update { term, document } => {
                    buffer.retain(|buffered| !buffered.matches(term));
                    deletes.push(PendingDelete {
                        term: term.clone(),
                        segment_limit,
                    });
                    buffer.push(document.clone());
                }
                IndexOperation::Delete(term) => {
                    buffer.retain(|buffered| !buffered.matches(term));
                    deletes.push(PendingDelete {
                        term: term.clone(),
                        segment_limit,
                    });
                }
            }
        }

        let documents_added = buffer.len() as u64;
        let deletes_buffered = deletes.len() as u64;
        state.pending_deletes.extend(deletes);
        if !buffer.is_empty() {
            let name = format!("_{}", state.next_segment);
            state.next_segment += 1;
            let live_docs = BitVec::from_elem(buffer.len(), true);
            state.segments.push(SegmentEntry {
                view: SegmentView {
                    segment: Arc::new(Segment::build(name, buffer)),
                    live_docs: Arc::new(live_docs),
                },
                persisted: false,
            });
        }
        state.generation += 1;

        tracing::debug!(
            index = %self.index_name,
            generation = state.generation,
            documents_added,
            deletes_buffered,
            "applied batch"
        );

        Ok(BatchResult {
            generation: state.generation,
            documents_added,
            deletes_buffered,
        })
    }

    /// Persist all applied changes and publish a new commit point.
    ///
    /// Returns the committed generation. Committing an unchanged index is a
    /// no-op.
    pub fn commit(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NrtError::already_closed(format!(
                "writer of index '{}'",
                self.index_name
            )));
        }

        state.resolve_deletes();
        if state.generation == state.committed_generation
            && self.storage.file_exists(&format!("{COMMIT_PREFIX}{}", state.generation))
        {
            return Ok(state.generation);
        }

        for entry in state.segments.iter_mut().filter(|entry| !entry.persisted) {
            let segment = &entry.view.segment;
            storage::write_all(
                self.storage.as_ref(),
                &segment.file_name(),
                &segment.encode()?,
            )?;
            entry.persisted = true;
        }

        let commit = state.commit_point();
        let temp_name = format!("pending_{COMMIT_PREFIX}{}", Uuid::new_v4().simple());
        storage::write_all(self.storage.as_ref(), &temp_name, &commit.encode()?)?;
        self.storage.rename_file(&temp_name, &commit.file_name())?;
        self.storage.sync()?;

        let previous = state.committed_generation;
        state.committed_generation = commit.generation;
        self.delete_stale_commits(previous);

        tracing::debug!(
            index = %self.index_name,
            generation = commit.generation,
            segments = commit.segments.len(),
            "committed index"
        );
        Ok(commit.generation)
    }

    /// Delete commit points older than `keep_from`.
    ///
    /// The previous commit point is kept so that a durable reader that listed
    /// it just before this commit can still load it.
    fn delete_stale_commits(&self, keep_from: u64) {
        let files = match self.storage.list_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(index = %self.index_name, "unable to list index files: {e}");
                return;
            }
        };
        for name in files {
            if let Some(generation) = commit_generation(&name)
                && generation < keep_from
                && let Err(e) = self.storage.delete_file(&name)
            {
                tracing::warn!(index = %self.index_name, "unable to delete {name}: {e}");
            }
        }
    }

    /// Reject further batches and commits. Uncommitted changes are discarded.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            tracing::debug!(index = %self.index_name, "closed index writer");
        }
    }

    /// Whether [`IndexWriterHolder::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current writer generation (one per applied batch).
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Generation of the last commit.
    pub fn committed_generation(&self) -> u64 {
        self.state.lock().committed_generation
    }

    /// Number of segments, committed or not.
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// Number of deletes not yet resolved into live docs.
    pub fn pending_delete_count(&self) -> usize {
        self.state.lock().pending_deletes.len()
    }

    /// Reader lifecycle counters.
    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// The storage this writer commits to.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}

impl WriterHolder for IndexWriterHolder {
    fn index_name(&self) -> &str {
        &self.index_name
    }

    fn open_nrt_reader(&self, apply_deletions: bool) -> Result<Box<dyn IndexReader>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NrtError::already_closed(format!(
                "writer of index '{}'",
                self.index_name
            )));
        }
        if apply_deletions {
            state.resolve_deletes();
        }

        Ok(Box::new(SnapshotReader::new(
            self.index_name.clone(),
            state.generation,
            SnapshotSource::NearRealTime,
            state.views(),
            Arc::clone(&self.stats),
        )))
    }

    fn open_directory_reader(&self) -> Result<Box<dyn IndexReader>> {
        let (generation, views) = match read_latest_commit(self.storage.as_ref())? {
            Some(commit) => (
                commit.generation,
                load_commit(self.storage.as_ref(), &commit)?,
            ),
            None => (0, Vec::new()),
        };

        Ok(Box::new(SnapshotReader::new(
            self.index_name.clone(),
            generation,
            SnapshotSource::Directory,
            views,
            Arc::clone(&self.stats),
        )))
    }
}
