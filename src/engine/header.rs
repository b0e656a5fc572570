//! The engine header: one small file tying the subsystems together.
//!
//! The header's checksum is a crc32 over the checksums of the schema store,
//! the document store, and the index, computed at persist time. At startup a
//! missing or mismatching header means the subsystems drifted apart (e.g. a
//! crash between component flushes) and the index must be reconciled against
//! the document log.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::{Storage, StructReader, StructWriter};

/// File name of the header under the base directory.
pub const HEADER_FILE: &str = "search_engine_header";

const HEADER_MAGIC: u32 = 0x1C1E_57A1;

/// Combine the three subsystem checksums into the header checksum.
pub fn combined_checksum(schema_checksum: u32, doc_store_checksum: u32, index_checksum: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&schema_checksum.to_le_bytes());
    hasher.update(&doc_store_checksum.to_le_bytes());
    hasher.update(&index_checksum.to_le_bytes());
    hasher.finalize()
}

/// Read the persisted header checksum.
///
/// Returns `None` for a missing, truncated, or bad-magic header; the caller
/// treats all three the same way.
pub fn read(storage: &Arc<dyn Storage>) -> Option<u32> {
    if !storage.file_exists(HEADER_FILE) {
        return None;
    }
    let input = storage.open_input(HEADER_FILE).ok()?;
    let mut reader = StructReader::new(input).ok()?;
    let magic = reader.read_u32().ok()?;
    let checksum = reader.read_u32().ok()?;
    if !reader.verify_checksum().ok()? || magic != HEADER_MAGIC {
        return None;
    }
    Some(checksum)
}

/// Write the header with the given combined checksum.
pub fn write(storage: &Arc<dyn Storage>, checksum: u32) -> Result<()> {
    let output = storage.create_output(HEADER_FILE)?;
    let mut writer = StructWriter::new(output);
    writer.write_u32(HEADER_MAGIC)?;
    writer.write_u32(checksum)?;
    writer.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_write_read_round_trip() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        assert_eq!(read(&storage), None);

        write(&storage, 0xDEADBEEF).unwrap();
        assert_eq!(read(&storage), Some(0xDEADBEEF));
    }

    #[test]
    fn test_corrupt_header_reads_as_missing() {
        let memory = Arc::new(MemoryStorage::new());
        let storage: Arc<dyn Storage> = Arc::clone(&memory) as Arc<dyn Storage>;
        write(&storage, 7).unwrap();

        let mut raw = memory.get_raw(HEADER_FILE).unwrap();
        raw[5] ^= 0xFF;
        memory.put_raw(HEADER_FILE, raw);

        assert_eq!(read(&storage), None);
    }

    #[test]
    fn test_combined_checksum_is_order_sensitive() {
        let a = combined_checksum(1, 2, 3);
        let b = combined_checksum(3, 2, 1);
        assert_ne!(a, b);
    }
}
