//! In-memory storage implementation for testing and caching.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

type FileMap = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// Initial capacity of the file table.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 16,
        }
    }
}

/// An in-memory storage implementation.
///
/// Finalized files are kept as `Arc<[u8]>` so opening an input never copies
/// the file content.
#[derive(Debug)]
pub struct MemoryStorage {
    files: FileMap,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(HashMap::with_capacity(config.initial_capacity))),
        }
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|data| data.len() as u64).sum()
    }

    /// Replace the raw content of a file.
    ///
    /// Bypasses the output protocol; useful to simulate damaged files.
    pub fn overwrite(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.to_string(), Arc::from(data));
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput::new(Arc::clone(data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let files = self.files.lock();
        let mut file_names: Vec<String> = files.keys().cloned().collect();
        file_names.sort();
        Ok(file_names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(data.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;

        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
    size: u64,
}

impl MemoryInput {
    fn new(data: Arc<[u8]>) -> Self {
        let size = data.len() as u64;
        MemoryInput {
            cursor: Cursor::new(data),
            size,
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based output implementation.
///
/// Data is buffered locally and published into the file table on close.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap) -> Self {
        MemoryOutput {
            name,
            buffer: Vec::new(),
            files,
            closed: false,
        }
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }

        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        if self.closed {
            return Err(StorageError::OutputClosed(self.name.clone()).into());
        }
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.buffer.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            let data: Arc<[u8]> = Arc::from(std::mem::take(&mut self.buffer));
            self.files.lock().insert(self.name.clone(), data);
            self.closed = true;
        }
        Ok(())
    }
}
