//! Side channel for failures that must not abort the caller.
//!
//! Closing readers, refreshing the reference reader from the batch thread and
//! background commits can fail without the failure belonging to anyone's
//! request. Those failures are handed to an [`ErrorHandler`] instead of being
//! returned.

use std::fmt;

use crate::error::NrtError;

/// The operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Closing a reference reader after it was superseded.
    CloseReferenceReader,
    /// Closing a reader handed out to a caller.
    CloseServedReader,
    /// Opening a new reference reader after a batch.
    RefreshReference,
    /// Applying a batch on the backend thread.
    ApplyBatch,
    /// Committing the index.
    Commit,
    /// Shutting a workspace or backend down.
    Shutdown,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CloseReferenceReader => "close superseded reference reader",
            Operation::CloseServedReader => "close index reader",
            Operation::RefreshReference => "refresh reference reader",
            Operation::ApplyBatch => "apply batch",
            Operation::Commit => "commit index",
            Operation::Shutdown => "shut down",
        };
        f.write_str(name)
    }
}

/// A reported failure.
#[derive(Debug)]
pub struct ErrorContext {
    /// What was being done.
    pub operation: Operation,
    /// The index it was done on.
    pub index_name: String,
    /// Why it failed.
    pub cause: NrtError,
}

impl ErrorContext {
    /// Create a new context.
    pub fn new(operation: Operation, index_name: impl Into<String>, cause: NrtError) -> Self {
        ErrorContext {
            operation,
            index_name: index_name.into(),
            cause,
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unable to {} on index '{}': {}",
            self.operation, self.index_name, self.cause
        )
    }
}

/// Receives failures that are reported instead of returned.
///
/// Implementations must not block for long and must not panic.
pub trait ErrorHandler: Send + Sync + fmt::Debug {
    /// Handle a failure.
    fn handle(&self, context: ErrorContext);
}

/// Default handler: logs every failure at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, context: ErrorContext) {
        tracing::error!(
            index = %context.index_name,
            operation = %context.operation,
            "{context}"
        );
    }
}
