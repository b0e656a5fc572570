//! The append-only document log.
//!
//! Every mutation of the document store is a record appended here; the
//! derived in-memory maps can always be rebuilt by replaying the log from
//! the start. Each record is framed as
//! `[varint payload_len][u32 payload crc32][payload]`, so a torn tail write
//! is detected and truncated away on the next open.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::Document;
use crate::error::{LanternError, Result};
use crate::storage::{Storage, StorageOutput};
use crate::util::varint;

/// How much of the log survived the last open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataStatus {
    /// Every record was intact.
    #[default]
    NoDataLoss,
    /// A corrupt tail was truncated; earlier records survived.
    PartialLoss,
    /// Nothing could be read; the log was reset to empty.
    CompleteLoss,
}

/// One record of the document log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A document insertion or same-identity replacement.
    Put { document: Document },
    /// A single-document tombstone.
    Delete { namespace: String, uri: String },
    /// Tombstones for every live document in a namespace.
    DeleteNamespace { namespace: String },
    /// Tombstones for every live document of a schema type.
    DeleteType { schema_type: String },
}

/// The append-only record log.
pub struct DocumentLog {
    storage: Arc<dyn Storage>,
    path: String,
    appender: Box<dyn StorageOutput>,
    size: u64,
    /// Cumulative crc32 over every record payload, in log order.
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for DocumentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLog")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

impl DocumentLog {
    /// Open the log, replaying and validating every record.
    ///
    /// Returns the log handle, the surviving records with their offsets, and
    /// the resulting data status. A corrupt tail is truncated in place; a
    /// log whose first record is already unreadable is reset to empty.
    pub fn open(
        storage: Arc<dyn Storage>,
        path: &str,
    ) -> Result<(Self, Vec<(u64, LogRecord)>, DataStatus)> {
        let mut records = Vec::new();
        let mut hasher = crc32fast::Hasher::new();
        let mut good_end: u64 = 0;
        let mut status = DataStatus::NoDataLoss;

        if storage.file_exists(path) {
            let mut input = storage.open_input(path)?;
            let total = input.size()?;
            let mut buf = Vec::with_capacity(total as usize);
            input.read_to_end(&mut buf)?;

            let mut pos: usize = 0;
            loop {
                if pos >= buf.len() {
                    break;
                }
                match read_record(&buf[pos..]) {
                    Ok((record, payload, consumed)) => {
                        hasher.update(payload);
                        records.push((pos as u64, record));
                        pos += consumed;
                        good_end = pos as u64;
                    }
                    Err(_) => {
                        status = if good_end == 0 {
                            DataStatus::CompleteLoss
                        } else {
                            DataStatus::PartialLoss
                        };
                        warn!(
                            "document log corrupt at offset {pos}; truncating {} stray bytes",
                            buf.len() - pos
                        );
                        break;
                    }
                }
            }

            if good_end < total {
                if status == DataStatus::NoDataLoss {
                    // Clean records followed by trailing garbage with no
                    // parseable frame; still a truncation.
                    status = DataStatus::PartialLoss;
                }
                storage.truncate(path, good_end)?;
            }
        }

        let appender = storage.append_output(path)?;
        Ok((
            DocumentLog {
                storage,
                path: path.to_string(),
                appender,
                size: good_end,
                hasher,
            },
            records,
            status,
        ))
    }

    /// Append a record, returning its offset and encoded length.
    pub fn append(&mut self, record: &LogRecord) -> Result<(u64, u32)> {
        let payload = serde_json::to_vec(record)?;
        let len_prefix = varint::encode_u64(payload.len() as u64);
        let offset = self.size;

        self.appender.write_all(&len_prefix)?;
        self.appender
            .write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
        self.appender.write_all(&payload)?;
        // Flush so same-instance readers observe the record; durability
        // waits for persist_to_disk.
        self.appender.flush()?;

        self.hasher.update(&payload);
        let encoded_len = (len_prefix.len() + 4 + payload.len()) as u32;
        self.size += encoded_len as u64;
        Ok((offset, encoded_len))
    }

    /// Read the single record starting at the given offset.
    pub fn read_at(&self, offset: u64) -> Result<LogRecord> {
        let mut input = self.storage.open_input(&self.path)?;
        input.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        input.take_record_bytes(&mut buf)?;
        let (record, _, _) = read_record(&buf)?;
        Ok(record)
    }

    /// Current log size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Cumulative checksum over every record payload.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Flush and sync the log to durable storage.
    pub fn persist_to_disk(&mut self) -> Result<()> {
        self.appender.flush_and_sync()
    }
}

/// Parse one framed record from the head of `buf`.
///
/// Returns the record, the payload slice, and the total bytes consumed.
fn read_record(buf: &[u8]) -> Result<(LogRecord, &[u8], usize)> {
    let (payload_len, prefix_len) = varint::decode_u64(buf)?;
    let payload_len = payload_len as usize;

    let crc_start = prefix_len;
    let payload_start = crc_start + 4;
    let payload_end = payload_start
        .checked_add(payload_len)
        .ok_or_else(|| LanternError::data_loss("record length overflow"))?;
    if buf.len() < payload_end {
        return Err(LanternError::data_loss("truncated record"));
    }

    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&buf[crc_start..payload_start]);
    let stored_crc = u32::from_le_bytes(crc_bytes);
    let payload = &buf[payload_start..payload_end];
    if crc32fast::hash(payload) != stored_crc {
        return Err(LanternError::data_loss("record checksum mismatch"));
    }

    let record = serde_json::from_slice(payload)?;
    Ok((record, payload, payload_end))
}

/// Helper to pull one frame's bytes from a positioned reader.
trait TakeRecordBytes {
    fn take_record_bytes(&mut self, out: &mut Vec<u8>) -> Result<()>;
}

impl<R: Read> TakeRecordBytes for R {
    fn take_record_bytes(&mut self, out: &mut Vec<u8>) -> Result<()> {
        // Length prefix, one byte at a time.
        loop {
            let byte = self.read_u8()?;
            out.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }
        let (payload_len, _) = varint::decode_u64(out)?;

        let mut rest = vec![0u8; payload_len as usize + 4];
        self.read_exact(&mut rest)?;
        out.extend_from_slice(&rest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn put(uri: &str) -> LogRecord {
        LogRecord::Put {
            document: Document::builder("ns", uri, "email")
                .string_property("body", "message body")
                .build(),
        }
    }

    #[test]
    fn test_append_and_replay() {
        let storage = Arc::new(MemoryStorage::new());
        let mut offsets = Vec::new();
        {
            let (mut log, records, status) =
                DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
            assert!(records.is_empty());
            assert_eq!(status, DataStatus::NoDataLoss);

            for uri in ["uri1", "uri2", "uri3"] {
                let (offset, _) = log.append(&put(uri)).unwrap();
                offsets.push(offset);
            }
            assert_eq!(log.read_at(offsets[1]).unwrap(), put("uri2"));
            log.persist_to_disk().unwrap();
        }

        let (log, records, status) =
            DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
        assert_eq!(status, DataStatus::NoDataLoss);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].1, put("uri1"));
        assert_eq!(records[2].1, put("uri3"));
        assert_eq!(records[1].0, offsets[1]);
        assert_eq!(log.read_at(offsets[2]).unwrap(), put("uri3"));
    }

    #[test]
    fn test_checksum_is_stable_across_reopen() {
        let storage = Arc::new(MemoryStorage::new());
        let checksum = {
            let (mut log, _, _) =
                DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
            log.append(&put("uri1")).unwrap();
            log.append(&put("uri2")).unwrap();
            log.persist_to_disk().unwrap();
            log.checksum()
        };

        let (log, _, _) =
            DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
        assert_eq!(log.checksum(), checksum);
    }

    #[test]
    fn test_corrupt_tail_truncates_to_last_good_record() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let (mut log, _, _) =
                DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
            log.append(&put("uri1")).unwrap();
            log.append(&put("uri2")).unwrap();
            log.persist_to_disk().unwrap();
        }

        // A stray byte after a clean shutdown.
        let mut raw = storage.get_raw("doc/log").unwrap();
        let clean_len = raw.len();
        raw.push(0xAB);
        storage.put_raw("doc/log", raw);

        let (log, records, status) =
            DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
        assert_eq!(status, DataStatus::PartialLoss);
        assert_eq!(records.len(), 2);
        assert_eq!(log.size(), clean_len as u64);
    }

    #[test]
    fn test_corrupt_payload_drops_tail() {
        let storage = Arc::new(MemoryStorage::new());
        let first_record_end;
        {
            let (mut log, _, _) =
                DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
            log.append(&put("uri1")).unwrap();
            first_record_end = log.size();
            log.append(&put("uri2")).unwrap();
            log.persist_to_disk().unwrap();
        }

        // Flip a byte inside the second record's payload.
        let mut raw = storage.get_raw("doc/log").unwrap();
        let index = first_record_end as usize + 8;
        raw[index] ^= 0xFF;
        storage.put_raw("doc/log", raw);

        let (_, records, status) =
            DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
        assert_eq!(status, DataStatus::PartialLoss);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, put("uri1"));
    }

    #[test]
    fn test_fully_corrupt_log_is_complete_loss() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let (mut log, _, _) =
                DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
            log.append(&put("uri1")).unwrap();
            log.persist_to_disk().unwrap();
        }

        // Corrupt the very first payload byte.
        let mut raw = storage.get_raw("doc/log").unwrap();
        raw[6] ^= 0xFF;
        storage.put_raw("doc/log", raw);

        let (log, records, status) =
            DocumentLog::open(Arc::clone(&storage) as Arc<dyn Storage>, "doc/log").unwrap();
        assert_eq!(status, DataStatus::CompleteLoss);
        assert!(records.is_empty());
        assert_eq!(log.size(), 0);
    }
}
