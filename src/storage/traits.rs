//! Storage abstraction trait and common types.

use std::io::{Read, Seek, Write};

use crate::error::Result;

/// A byte-level storage backend.
///
/// Names are slash-separated relative paths (`"document_dir/document_log"`);
/// a name prefix up to a slash acts as a directory for the purposes of
/// [`swap_dirs`](Storage::swap_dirs) and [`delete_dir`](Storage::delete_dir).
/// Implementations create intermediate directories on demand.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open a file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing content.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Open a file for appending, creating it if absent.
    fn append_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Truncate a file to the given length.
    fn truncate(&self, name: &str, len: u64) -> Result<()>;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// Rename a file.
    fn rename(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// List all file names beginning with the given prefix.
    fn list_files(&self, prefix: &str) -> Result<Vec<String>>;

    /// Exchange the contents of two directories.
    ///
    /// This is the atomic publish point for compaction and index merges: a
    /// fully built replacement directory is swapped with the live one in a
    /// single step. A missing directory is treated as empty.
    fn swap_dirs(&self, dir_a: &str, dir_b: &str) -> Result<()>;

    /// Delete a directory and everything under it. Missing is not an error.
    fn delete_dir(&self, dir: &str) -> Result<()>;

    /// Check whether any file exists under the given directory.
    fn dir_exists(&self, dir: &str) -> bool;

    /// Sync all pending writes to durable storage.
    fn sync(&self) -> Result<()>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Get the size of the input stream.
    fn size(&self) -> Result<u64>;
}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush buffered data and sync it to durable storage.
    fn flush_and_sync(&mut self) -> Result<()>;
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }
}
