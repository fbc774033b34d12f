//! Dedicated writer thread fed by a bounded batch queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, SendError, Sender, bounded};

use crate::backend::IndexBackend;
use crate::error::{NrtError, Result};
use crate::index::writer::{BatchResult, IndexOperation};
use crate::workspace::error_handler::Operation;

/// A batch waiting for the writer thread.
#[derive(Debug)]
struct QueuedBatch {
    operations: Vec<IndexOperation>,
    completion: Sender<Result<BatchResult>>,
}

/// Runs batches of one backend on a single writer thread, in submission order.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use sarissa_nrt::backend::{BatchQueue, IndexBackend};
/// use sarissa_nrt::document::Document;
/// use sarissa_nrt::index::writer::IndexOperation;
/// use sarissa_nrt::storage::StorageConfig;
/// use sarissa_nrt::workspace::WorkspaceConfig;
///
/// # fn main() -> sarissa_nrt::error::Result<()> {
/// let backend = Arc::new(IndexBackend::open(
///     "queued",
///     StorageConfig::default(),
///     WorkspaceConfig::default(),
/// )?);
/// let mut queue = BatchQueue::start(backend.clone())?;
///
/// let done = queue.submit(vec![IndexOperation::Add(
///     Document::builder().add_text("id", "1").build(),
/// )])?;
/// assert_eq!(done.recv().unwrap()?.generation, 1);
///
/// queue.shutdown()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BatchQueue {
    index_name: String,
    sender: Option<Sender<QueuedBatch>>,
    worker: Option<JoinHandle<()>>,
}

impl BatchQueue {
    /// Spawn the writer thread for `backend`.
    ///
    /// The queue holds at most `queue_capacity` batches (from the backend's
    /// configuration); `submit` blocks while it is full.
    pub fn start(backend: Arc<IndexBackend>) -> Result<Self> {
        let index_name = backend.workspace().index_name().to_string();
        let (sender, receiver) = bounded::<QueuedBatch>(backend.config.queue_capacity);

        let worker = thread::Builder::new()
            .name(format!("nrt-writer-{index_name}"))
            .spawn(move || Self::run(backend, receiver))?;

        tracing::debug!(index = %index_name, "started batch queue");
        Ok(BatchQueue {
            index_name,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn run(backend: Arc<IndexBackend>, receiver: Receiver<QueuedBatch>) {
        for batch in receiver {
            let result = backend.apply_batch(&batch.operations);
            // Nobody is waiting for this batch: make sure a failure is still seen.
            if let Err(SendError(Err(e))) = batch.completion.send(result) {
                backend.report(Operation::ApplyBatch, e);
            }
        }
    }

    /// Queue a batch. The returned receiver yields the batch outcome once the
    /// writer thread has applied it.
    pub fn submit(&self, operations: Vec<IndexOperation>) -> Result<Receiver<Result<BatchResult>>> {
        let sender = self.sender.as_ref().ok_or_else(|| self.closed_error())?;
        let (completion, outcome) = bounded(1);
        sender
            .send(QueuedBatch {
                operations,
                completion,
            })
            .map_err(|_| self.closed_error())?;
        Ok(outcome)
    }

    /// Stop accepting batches, apply everything already queued and join the
    /// writer thread.
    pub fn shutdown(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| {
                NrtError::other(format!("writer thread of index '{}' panicked", self.index_name))
            })?;
            tracing::debug!(index = %self.index_name, "stopped batch queue");
        }
        Ok(())
    }

    fn closed_error(&self) -> NrtError {
        NrtError::already_closed(format!("batch queue of index '{}'", self.index_name))
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(index = %self.index_name, "{e}");
        }
    }
}
