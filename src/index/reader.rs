//! Index readers: point-in-time, independently closeable views of an index.
//!
//! A reader is opened either from the writer's in-memory state
//! (near-real-time) or from the last commit in storage. Its content never
//! changes after it is opened. [`IndexReader::try_clone`] produces a new
//! handle over the same snapshot: the heavyweight data (segments and live-doc
//! bitsets) is shared through `Arc`, while every handle owns its own closed
//! flag, so handles can be closed in any order.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bit_vec::BitVec;

use crate::analysis;
use crate::document::Document;
use crate::error::{NrtError, Result};
use crate::index::segment::Segment;

/// Trait for index readers.
///
/// Snapshot metadata ([`generation`](IndexReader::generation),
/// [`doc_count`](IndexReader::doc_count), [`max_doc`](IndexReader::max_doc),
/// [`is_deleted`](IndexReader::is_deleted)) is fixed when the reader opens and
/// stays readable after close. Operations that touch segment content
/// (`document`, `term_docs`, `try_clone`) return [`NrtError::AlreadyClosed`]
/// on a closed reader.
pub trait IndexReader: Send + Sync + std::fmt::Debug {
    /// Writer generation this snapshot reflects.
    ///
    /// Every applied batch bumps the generation, so two readers with the same
    /// generation see the same documents.
    fn generation(&self) -> u64;

    /// Number of live (non-deleted) documents.
    fn doc_count(&self) -> u64;

    /// One greater than the largest document id.
    fn max_doc(&self) -> u64;

    /// Check if a document is deleted (or out of range).
    fn is_deleted(&self, doc_id: u64) -> bool;

    /// Get a live document by ID.
    fn document(&self, doc_id: u64) -> Result<Option<Document>>;

    /// Ids of live documents indexed under `term` in `field`, ascending.
    ///
    /// `term` is normalized like [`crate::document::Term::new`], so it may be
    /// a single word or a whole field value.
    fn term_docs(&self, field: &str, term: &str) -> Result<Vec<u64>>;

    /// Get document frequency for a specific term in a field.
    fn term_doc_freq(&self, field: &str, term: &str) -> Result<u64> {
        Ok(self.term_docs(field, term)?.len() as u64)
    }

    /// Open a new, independently closeable handle over the same snapshot.
    fn try_clone(&self) -> Result<Box<dyn IndexReader>>;

    /// Close the reader and release resources. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Check if the reader is closed.
    fn is_closed(&self) -> bool;

    /// Get this reader as Any for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Where a snapshot was opened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// The writer's applied, possibly uncommitted state.
    NearRealTime,
    /// The last commit point in storage.
    Directory,
}

/// Lifecycle counters shared by a writer and every reader it opens.
#[derive(Debug, Default)]
pub struct ReaderStats {
    nrt_opens: AtomicU64,
    directory_opens: AtomicU64,
    handles_opened: AtomicU64,
    handles_closed: AtomicU64,
    snapshots_released: AtomicU64,
}

impl ReaderStats {
    /// Create a new set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of near-real-time snapshots opened.
    pub fn nrt_opens(&self) -> u64 {
        self.nrt_opens.load(Ordering::SeqCst)
    }

    /// Number of snapshots opened from storage.
    pub fn directory_opens(&self) -> u64 {
        self.directory_opens.load(Ordering::SeqCst)
    }

    /// Handles opened (initial snapshots and clones).
    pub fn handles_opened(&self) -> u64 {
        self.handles_opened.load(Ordering::SeqCst)
    }

    /// Handles closed.
    pub fn handles_closed(&self) -> u64 {
        self.handles_closed.load(Ordering::SeqCst)
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> u64 {
        self.handles_opened()
            .saturating_sub(self.handles_closed())
    }

    /// Snapshots whose last handle has been closed.
    pub fn snapshots_released(&self) -> u64 {
        self.snapshots_released.load(Ordering::SeqCst)
    }

    pub(crate) fn record_open(&self, source: SnapshotSource) {
        match source {
            SnapshotSource::NearRealTime => self.nrt_opens.fetch_add(1, Ordering::SeqCst),
            SnapshotSource::Directory => self.directory_opens.fetch_add(1, Ordering::SeqCst),
        };
    }
}

/// A segment as seen by one snapshot.
#[derive(Debug, Clone)]
pub struct SegmentView {
    /// Shared immutable segment data.
    pub segment: Arc<Segment>,
    /// Live-doc bitset (`true` = live) as of the snapshot.
    pub live_docs: Arc<BitVec>,
}

#[derive(Debug)]
struct SegmentSlice {
    view: SegmentView,
    doc_base: u64,
}

/// State shared by all handles of one snapshot.
#[derive(Debug)]
struct SnapshotCore {
    index_name: String,
    generation: u64,
    source: SnapshotSource,
    segments: Vec<SegmentSlice>,
    max_doc: u64,
    doc_count: u64,
    handles: AtomicUsize,
    stats: Arc<ReaderStats>,
}

impl SnapshotCore {
    fn locate(&self, doc_id: u64) -> Option<(&SegmentSlice, u32)> {
        if doc_id >= self.max_doc {
            return None;
        }
        let idx = self
            .segments
            .partition_point(|slice| slice.doc_base <= doc_id)
            .checked_sub(1)?;
        let slice = &self.segments[idx];
        Some((slice, (doc_id - slice.doc_base) as u32))
    }

    fn is_live(slice: &SegmentSlice, local_id: u32) -> bool {
        slice.view.live_docs.get(local_id as usize).unwrap_or(false)
    }
}

/// The reader implementation produced by [`crate::index::writer::IndexWriterHolder`].
#[derive(Debug)]
pub struct SnapshotReader {
    core: Arc<SnapshotCore>,
    closed: bool,
}

impl SnapshotReader {
    /// Open a snapshot over `segments`.
    pub fn new(
        index_name: impl Into<String>,
        generation: u64,
        source: SnapshotSource,
        segments: Vec<SegmentView>,
        stats: Arc<ReaderStats>,
    ) -> Self {
        let mut doc_base = 0u64;
        let mut doc_count = 0u64;
        let mut slices = Vec::with_capacity(segments.len());
        for view in segments {
            let max_doc = u64::from(view.segment.max_doc());
            doc_count += view.live_docs.iter().filter(|live| *live).count() as u64;
            slices.push(SegmentSlice { view, doc_base });
            doc_base += max_doc;
        }

        stats.record_open(source);
        stats.handles_opened.fetch_add(1, Ordering::SeqCst);

        let core = SnapshotCore {
            index_name: index_name.into(),
            generation,
            source,
            segments: slices,
            max_doc: doc_base,
            doc_count,
            handles: AtomicUsize::new(1),
            stats,
        };
        tracing::trace!(
            index = %core.index_name,
            generation,
            ?source,
            "opened index snapshot"
        );

        SnapshotReader {
            core: Arc::new(core),
            closed: false,
        }
    }

    /// Where this snapshot was opened from.
    pub fn source(&self) -> SnapshotSource {
        self.core.source
    }

    /// Name of the index this snapshot belongs to.
    pub fn index_name(&self) -> &str {
        &self.core.index_name
    }

    /// Number of open handles over this snapshot, including this one.
    pub fn open_handles(&self) -> usize {
        self.core.handles.load(Ordering::SeqCst)
    }

    /// Whether `other` is a handle over the same snapshot.
    pub fn shares_snapshot_with(&self, other: &SnapshotReader) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(NrtError::already_closed(format!(
                "reader on index '{}'",
                self.core.index_name
            )));
        }
        Ok(())
    }
}

impl IndexReader for SnapshotReader {
    fn generation(&self) -> u64 {
        self.core.generation
    }

    fn doc_count(&self) -> u64 {
        self.core.doc_count
    }

    fn max_doc(&self) -> u64 {
        self.core.max_doc
    }

    fn is_deleted(&self, doc_id: u64) -> bool {
        match self.core.locate(doc_id) {
            Some((slice, local_id)) => !SnapshotCore::is_live(slice, local_id),
            None => true,
        }
    }

    fn document(&self, doc_id: u64) -> Result<Option<Document>> {
        self.ensure_open()?;
        Ok(self.core.locate(doc_id).and_then(|(slice, local_id)| {
            if SnapshotCore::is_live(slice, local_id) {
                slice.view.segment.document(local_id).cloned()
            } else {
                None
            }
        }))
    }

    fn term_docs(&self, field: &str, term: &str) -> Result<Vec<u64>> {
        self.ensure_open()?;
        let term = analysis::normalize(term);
        let mut docs = Vec::new();
        for slice in &self.core.segments {
            docs.extend(
                slice
                    .view
                    .segment
                    .postings(field, &term)
                    .iter()
                    .filter(|local_id| SnapshotCore::is_live(slice, **local_id))
                    .map(|local_id| slice.doc_base + u64::from(*local_id)),
            );
        }
        Ok(docs)
    }

    fn try_clone(&self) -> Result<Box<dyn IndexReader>> {
        self.ensure_open()?;
        self.core.handles.fetch_add(1, Ordering::SeqCst);
        self.core.stats.handles_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SnapshotReader {
            core: Arc::clone(&self.core),
            closed: false,
        }))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.core.stats.handles_closed.fetch_add(1, Ordering::SeqCst);
        if self.core.handles.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.core
                .stats
                .snapshots_released
                .fetch_add(1, Ordering::SeqCst);
            tracing::trace!(
                index = %self.core.index_name,
                generation = self.core.generation,
                "released index snapshot"
            );
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

impl Drop for SnapshotReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
