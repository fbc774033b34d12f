//! # Sarissa NRT
//!
//! Near-real-time index reader workspaces for Rust.
//!
//! ## Features
//!
//! - Lazily opened, cached reference reader per index
//! - Refresh after every applied batch, visible before the next batch
//! - Independent reader clones that outlive a refresh or a shutdown
//! - Committed-only directory readers as an alternative provider
//! - Checksummed segment and commit files with corruption detection
//! - Pluggable storage backends (file, memory)

pub mod analysis;
pub mod backend;
pub mod document;
pub mod error;
pub mod index;
pub mod storage;
pub mod workspace;

pub mod prelude {
    pub use crate::backend::{BatchQueue, IndexBackend};
    pub use crate::document::{Document, Term};
    pub use crate::error::{NrtError, Result};
    pub use crate::index::{IndexOperation, IndexReader, IndexWriterHolder, WriterHolder};
    pub use crate::workspace::{NrtWorkspace, ReaderProvider, WorkspaceConfig};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
