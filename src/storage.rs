//! Storage abstraction layer.
//!
//! The index writer persists segments and commit points through the
//! [`Storage`] trait, and durable readers load them back through it. File
//! and memory backends can be swapped without touching the index or the
//! workspace.
//!
//! # Storage Types
//!
//! ## FileStorage
//! - Disk-based persistent storage
//! - Configurable buffering and syncing
//!
//! ## MemoryStorage
//! - In-memory storage for testing and temporary data
//! - Fast but non-persistent
//!
//! # Example
//!
//! ```
//! use sarissa_nrt::storage::{StorageConfig, StorageFactory};
//! use sarissa_nrt::storage::memory::MemoryStorageConfig;
//!
//! # fn main() -> sarissa_nrt::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//! assert!(!storage.file_exists("segments_1"));
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{NrtError, Result};

pub mod file;
pub mod memory;

/// A trait for storage backends that can store and retrieve data.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    ///
    /// The content becomes visible to readers once the output is closed.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in the storage, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file, replacing any existing file with the new name.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Sync all pending writes to storage.
    fn sync(&self) -> Result<()>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;

    /// Close the input stream.
    fn close(&mut self) -> Result<()>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Get the current position in the output stream.
    fn position(&self) -> Result<u64>;

    /// Close the output stream, publishing its content.
    fn close(&mut self) -> Result<()>;
}

/// Read a whole file into memory.
pub fn read_all(storage: &dyn Storage, name: &str) -> Result<Vec<u8>> {
    let mut input = storage.open_input(name)?;
    let mut buffer = Vec::with_capacity(input.size()? as usize);
    input.read_to_end(&mut buffer)?;
    input.close()?;
    Ok(buffer)
}

/// Write a whole file and close it.
pub fn write_all(storage: &dyn Storage, name: &str, data: &[u8]) -> Result<()> {
    let mut output = storage.create_output(name)?;
    output.write_all(data)?;
    output.close()
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// File-system based storage.
    File(file::FileStorageConfig),

    /// In-memory storage.
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// Factory for creating storage instances from a [`StorageConfig`].
pub struct StorageFactory;

impl StorageFactory {
    /// Create a storage instance.
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                let storage = memory::MemoryStorage::new(mem_config);
                Ok(Arc::new(storage))
            }
            StorageConfig::File(file_config) => {
                let storage = file::FileStorage::new(file_config)?;
                Ok(Arc::new(storage))
            }
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    /// File not found.
    FileNotFound(String),

    /// I/O error.
    IoError(String),

    /// Output already closed.
    OutputClosed(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::OutputClosed(name) => write!(f, "Output is closed: {name}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for NrtError {
    fn from(err: StorageError) -> Self {
        NrtError::storage(err.to_string())
    }
}
