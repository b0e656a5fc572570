//! File-based storage implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{LanternError, Result};
use crate::storage::traits::{Storage, StorageInput, StorageOutput};

/// A storage implementation rooted at a directory on the real filesystem.
///
/// Slash-separated names map directly onto paths below the root; parent
/// directories are created as needed.
#[derive(Debug)]
pub struct FileStorage {
    /// The root directory for storage.
    root: PathBuf,
}

impl FileStorage {
    /// Create a new file storage rooted at the given directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            fs::create_dir_all(&root)?;
        }

        if !root.is_dir() {
            return Err(LanternError::internal(format!(
                "storage root is not a directory: {}",
                root.display()
            )));
        }

        Ok(FileStorage { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn collect_files(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.collect_files(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let path = self.path_for(name);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LanternError::not_found(format!("file not found: {name}"))
            } else {
                LanternError::Io(e)
            }
        })?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileInput {
            reader: BufReader::new(file),
            size,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.path_for(name);
        self.ensure_parent(&path)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(FileOutput {
            writer: BufWriter::new(file),
        }))
    }

    fn append_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.path_for(name);
        self.ensure_parent(&path)?;
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Box::new(FileOutput {
            writer: BufWriter::new(file),
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let path = self.path_for(name);
        let metadata = fs::metadata(&path)
            .map_err(|_| LanternError::not_found(format!("file not found: {name}")))?;
        Ok(metadata.len())
    }

    fn truncate(&self, name: &str, len: u64) -> Result<()> {
        let path = self.path_for(name);
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LanternError::Io(e)),
        }
    }

    fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let new_path = self.path_for(new_name);
        self.ensure_parent(&new_path)?;
        fs::rename(self.path_for(old_name), new_path)?;
        Ok(())
    }

    fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if self.root.exists() {
            let root = self.root.clone();
            self.collect_files(&root, &mut out)?;
        }
        out.retain(|name| name.starts_with(prefix));
        out.sort();
        Ok(out)
    }

    fn swap_dirs(&self, dir_a: &str, dir_b: &str) -> Result<()> {
        let path_a = self.path_for(dir_a);
        let path_b = self.path_for(dir_b);
        let tmp = self.path_for(&format!("{dir_a}.swap_tmp"));

        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        if !path_a.exists() {
            fs::create_dir_all(&path_a)?;
        }
        if !path_b.exists() {
            fs::create_dir_all(&path_b)?;
        }

        fs::rename(&path_a, &tmp)?;
        fs::rename(&path_b, &path_a)?;
        fs::rename(&tmp, &path_b)?;
        Ok(())
    }

    fn delete_dir(&self, dir: &str) -> Result<()> {
        let path = self.path_for(dir);
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LanternError::Io(e)),
        }
    }

    fn dir_exists(&self, dir: &str) -> bool {
        self.path_for(dir).is_dir()
    }

    fn sync(&self) -> Result<()> {
        // Individual outputs sync on flush_and_sync; directory metadata is
        // synced here so renames are durable.
        if let Ok(dir) = File::open(&self.root) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// Reader over a file on disk.
#[derive(Debug)]
struct FileInput {
    reader: BufReader<File>,
    size: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

/// Buffered writer over a file on disk.
#[derive(Debug)]
struct FileOutput {
    writer: BufWriter<File>,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        {
            let mut out = storage.create_output("sub/data.bin").unwrap();
            out.write_all(b"hello").unwrap();
            out.flush_and_sync().unwrap();
        }

        assert!(storage.file_exists("sub/data.bin"));
        assert_eq!(storage.file_size("sub/data.bin").unwrap(), 5);

        let mut input = storage.open_input("sub/data.bin").unwrap();
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn test_append_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        {
            let mut out = storage.append_output("log").unwrap();
            out.write_all(b"aaaa").unwrap();
            out.flush_and_sync().unwrap();
        }
        {
            let mut out = storage.append_output("log").unwrap();
            out.write_all(b"bbbb").unwrap();
            out.flush_and_sync().unwrap();
        }
        assert_eq!(storage.file_size("log").unwrap(), 8);

        storage.truncate("log", 4).unwrap();
        assert_eq!(storage.file_size("log").unwrap(), 4);

        let mut input = storage.open_input("log").unwrap();
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"aaaa");
    }

    #[test]
    fn test_swap_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        let mut out = storage.create_output("live/file").unwrap();
        out.write_all(b"old").unwrap();
        out.flush_and_sync().unwrap();
        drop(out);

        let mut out = storage.create_output("staged/file").unwrap();
        out.write_all(b"new").unwrap();
        out.flush_and_sync().unwrap();
        drop(out);

        storage.swap_dirs("live", "staged").unwrap();

        let mut input = storage.open_input("live/file").unwrap();
        let mut buf = Vec::new();
        input.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"new");

        storage.delete_dir("staged").unwrap();
        assert!(!storage.dir_exists("staged"));
        // Deleting again is fine.
        storage.delete_dir("staged").unwrap();
    }

    #[test]
    fn test_list_files_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        for name in ["a/one", "a/two", "b/three"] {
            let mut out = storage.create_output(name).unwrap();
            out.write_all(b"x").unwrap();
            out.flush_and_sync().unwrap();
        }

        let files = storage.list_files("a/").unwrap();
        assert_eq!(files, vec!["a/one".to_string(), "a/two".to_string()]);
    }
}
