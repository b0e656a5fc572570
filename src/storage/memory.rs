//! In-memory storage implementation for testing.
//!
//! Files are plain byte blobs in a shared map. Cloning the `Arc` the engine
//! holds and handing it to a second engine instance simulates a process
//! restart over the same on-disk state.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{LanternError, Result};
use crate::storage::traits::{Storage, StorageInput, StorageOutput};

type FileMap = BTreeMap<String, Box<[u8]>>;

/// An in-memory storage implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<FileMap>>,
}

impl MemoryStorage {
    /// Create a new, empty memory storage.
    pub fn new() -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Get the total size of all files.
    pub fn total_size(&self) -> u64 {
        self.files.lock().values().map(|d| d.len() as u64).sum()
    }

    /// Overwrite a file's bytes directly. Test hook for corruption scenarios.
    pub fn put_raw(&self, name: &str, data: Vec<u8>) {
        self.files
            .lock()
            .insert(name.to_string(), data.into_boxed_slice());
    }

    /// Read a file's bytes directly. Test hook for corruption scenarios.
    pub fn get_raw(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).map(|d| d.to_vec())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| LanternError::not_found(format!("file not found: {name}")))?;
        Ok(Box::new(MemoryInput {
            cursor: Cursor::new(data.to_vec()),
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            // A created file exists even if nothing is ever written to it.
            dirty: true,
            files: Arc::clone(&self.files),
        }))
    }

    fn append_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let existing = self
            .files
            .lock()
            .get(name)
            .map(|d| d.to_vec())
            .unwrap_or_default();
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: existing,
            dirty: false,
            files: Arc::clone(&self.files),
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.lock();
        files
            .get(name)
            .map(|d| d.len() as u64)
            .ok_or_else(|| LanternError::not_found(format!("file not found: {name}")))
    }

    fn truncate(&self, name: &str, len: u64) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .get_mut(name)
            .ok_or_else(|| LanternError::not_found(format!("file not found: {name}")))?;
        if (len as usize) < data.len() {
            let mut truncated = data.to_vec();
            truncated.truncate(len as usize);
            *data = truncated.into_boxed_slice();
        }
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| LanternError::not_found(format!("file not found: {old_name}")))?;
        files.insert(new_name.to_string(), data);
        Ok(())
    }

    fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn swap_dirs(&self, dir_a: &str, dir_b: &str) -> Result<()> {
        let prefix_a = format!("{dir_a}/");
        let prefix_b = format!("{dir_b}/");
        let mut files = self.files.lock();

        let mut swapped = BTreeMap::new();
        for (name, data) in std::mem::take(&mut *files) {
            let new_name = if let Some(rest) = name.strip_prefix(&prefix_a) {
                format!("{prefix_b}{rest}")
            } else if let Some(rest) = name.strip_prefix(&prefix_b) {
                format!("{prefix_a}{rest}")
            } else {
                name
            };
            swapped.insert(new_name, data);
        }
        *files = swapped;
        Ok(())
    }

    fn delete_dir(&self, dir: &str) -> Result<()> {
        let prefix = format!("{dir}/");
        self.files.lock().retain(|name, _| !name.starts_with(&prefix));
        Ok(())
    }

    fn dir_exists(&self, dir: &str) -> bool {
        let prefix = format!("{dir}/");
        self.files.lock().keys().any(|name| name.starts_with(&prefix))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Reader over an in-memory file snapshot.
#[derive(Debug)]
struct MemoryInput {
    cursor: Cursor<Vec<u8>>,
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// Writer that publishes its buffer into the shared map on flush.
///
/// Publication is skipped when no bytes were written since the last flush,
/// so dropping a stale handle after its file was replaced (e.g. by a
/// directory swap) cannot resurrect old content.
#[derive(Debug)]
struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    dirty: bool,
    files: Arc<Mutex<FileMap>>,
}

impl MemoryOutput {
    fn publish(&mut self) {
        if !self.dirty {
            return;
        }
        self.files
            .lock()
            .insert(self.name.clone(), self.buffer.clone().into_boxed_slice());
        self.dirty = false;
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.dirty = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.publish();
    }
}
