//! Reader workspaces: how query execution obtains index readers.
//!
//! - [`NrtWorkspace`] caches a near-real-time reference reader, refreshes it
//!   after every applied batch, and serves independent clones.
//! - [`DirectoryReaderProvider`] opens a fresh committed-only reader per
//!   request.
//!
//! Both implement [`ReaderProvider`], the only surface query execution needs.

pub mod config;
pub mod error_handler;
pub mod nrt;
pub mod provider;

pub use config::WorkspaceConfig;
pub use error_handler::{ErrorContext, ErrorHandler, LogErrorHandler, Operation};
pub use nrt::NrtWorkspace;
pub use provider::{DirectoryReaderProvider, ReaderProvider};
