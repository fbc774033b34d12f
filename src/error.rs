//! Error types for the near-real-time reader workspace.
//!
//! All fallible operations return [`NrtError`]. Low-level failures
//! (corruption, I/O, storage) are produced by the index and storage layers;
//! the workspace translates them into [`NrtError::CorruptedIndex`] or
//! [`NrtError::IndexAccess`] so callers always learn which index failed.
//!
//! # Examples
//!
//! ```
//! use sarissa_nrt::error::{NrtError, Result};
//!
//! fn open() -> Result<()> {
//!     Err(NrtError::corrupt("checksum mismatch in _0.seg"))
//! }
//!
//! let err = open().unwrap_err().on_index("products");
//! assert!(err.is_corruption());
//! assert_eq!(err.index_name(), Some("products"));
//! ```

use std::io;

use thiserror::Error;

/// The main error type for workspace, index and storage operations.
#[derive(Error, Debug)]
pub enum NrtError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The on-disk or in-memory index structure is damaged.
    #[error("Corrupt index: {0}")]
    Corrupt(String),

    /// Index-related errors (invalid operations, bad batches).
    #[error("Index error: {0}")]
    Index(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// A reader, writer or workspace was used after being closed.
    #[error("Already closed: {0}")]
    AlreadyClosed(String),

    /// Opening or cloning a reader hit a corrupted index.
    #[error("Cannot open corrupted index '{index_name}': {source}")]
    CorruptedIndex {
        index_name: String,
        #[source]
        source: Box<NrtError>,
    },

    /// Opening or cloning a reader failed for any other reason.
    #[error("Unable to access index '{index_name}': {source}")]
    IndexAccess {
        index_name: String,
        #[source]
        source: Box<NrtError>,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Binary (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with NrtError.
pub type Result<T> = std::result::Result<T, NrtError>;

impl NrtError {
    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        NrtError::Corrupt(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        NrtError::Index(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        NrtError::Storage(msg.into())
    }

    /// Create a new already-closed error.
    pub fn already_closed<S: Into<String>>(msg: S) -> Self {
        NrtError::AlreadyClosed(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        NrtError::InvalidConfig(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        NrtError::Other(msg.into())
    }

    /// Attach the index identity to a reader-level failure.
    ///
    /// Corruption becomes [`NrtError::CorruptedIndex`], everything else
    /// becomes [`NrtError::IndexAccess`]. Errors that already carry an index
    /// name are returned unchanged.
    pub fn on_index(self, index_name: &str) -> Self {
        match self {
            NrtError::CorruptedIndex { .. } | NrtError::IndexAccess { .. } => self,
            NrtError::Corrupt(_) => NrtError::CorruptedIndex {
                index_name: index_name.to_string(),
                source: Box::new(self),
            },
            other => NrtError::IndexAccess {
                index_name: index_name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Whether this error (or the error it wraps) reports corruption.
    pub fn is_corruption(&self) -> bool {
        match self {
            NrtError::Corrupt(_) | NrtError::CorruptedIndex { .. } => true,
            NrtError::IndexAccess { source, .. } => source.is_corruption(),
            _ => false,
        }
    }

    /// The index identity carried by a translated error.
    pub fn index_name(&self) -> Option<&str> {
        match self {
            NrtError::CorruptedIndex { index_name, .. }
            | NrtError::IndexAccess { index_name, .. } => Some(index_name),
            _ => None,
        }
    }
}

impl From<bincode::Error> for NrtError {
    fn from(err: bincode::Error) -> Self {
        NrtError::Serialization(err.to_string())
    }
}
