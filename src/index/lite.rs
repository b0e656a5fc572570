//! The lite index: the small, mutable, in-memory tier.
//!
//! Recent inserts land here: a hash-backed lexicon interning terms to dense
//! term value indexes, plus an append-only buffer of `(tvi, hit)` pairs.
//! When the buffer outgrows the configured merge size the facade drains it
//! into the main tier. The whole structure is persisted as one checksummed
//! file on `persist_to_disk` and reloaded on startup.

use std::sync::Arc;

use ahash::AHashMap;

use crate::docstore::DocumentId;
use crate::error::{LanternError, Result};
use crate::index::hit::Hit;
use crate::schema::SectionIdMask;
use crate::storage::{Storage, StructReader, StructWriter};

const LITE_MAGIC: u32 = 0x117E_1DE0;

/// Approximate in-memory cost of one buffered hit.
const HIT_COST_BYTES: usize = 8;

/// Approximate fixed overhead of one interned term.
const TERM_COST_BYTES: usize = 8;

/// The mutable in-memory index tier.
#[derive(Debug, Default)]
pub struct LiteIndex {
    /// term → term value index.
    lexicon: AHashMap<String, u32>,
    /// term value index → term.
    terms: Vec<String>,
    /// Hit buffer in insertion order.
    hits: Vec<(u32, Hit)>,
    /// Approximate bytes consumed by the lexicon and buffer.
    bytes_used: usize,
    /// Largest document-id this tier has seen.
    last_added_document_id: Option<DocumentId>,
}

impl LiteIndex {
    /// Create an empty lite index.
    pub fn new() -> Self {
        LiteIndex::default()
    }

    /// Intern a term, returning its term value index.
    pub fn intern_term(&mut self, term: &str) -> u32 {
        if let Some(&tvi) = self.lexicon.get(term) {
            return tvi;
        }
        let tvi = self.terms.len() as u32;
        self.terms.push(term.to_string());
        self.lexicon.insert(term.to_string(), tvi);
        self.bytes_used += term.len() + TERM_COST_BYTES;
        tvi
    }

    /// Append a hit for an interned term.
    pub fn insert_hit(&mut self, tvi: u32, hit: Hit) {
        self.hits.push((tvi, hit));
        self.bytes_used += HIT_COST_BYTES;
        if self
            .last_added_document_id
            .map(|last| hit.document_id > last)
            .unwrap_or(true)
        {
            self.last_added_document_id = Some(hit.document_id);
        }
    }

    /// Record that a document has been fed through the indexer, whether or
    /// not it produced hits.
    pub fn set_last_added_document_id(&mut self, document_id: DocumentId) {
        if self
            .last_added_document_id
            .map(|last| document_id > last)
            .unwrap_or(true)
        {
            self.last_added_document_id = Some(document_id);
        }
    }

    /// Largest document-id seen by this tier.
    pub fn last_added_document_id(&self) -> Option<DocumentId> {
        self.last_added_document_id
    }

    /// The term value index of an exact term, if interned.
    pub fn seek_exact(&self, term: &str) -> Option<u32> {
        self.lexicon.get(term).copied()
    }

    /// All term value indexes whose term starts with `prefix`.
    ///
    /// The lite lexicon is small and unsorted, so this is a scan.
    pub fn seek_prefix(&self, prefix: &str) -> Vec<u32> {
        self.lexicon
            .iter()
            .filter(|(term, _)| term.starts_with(prefix))
            .map(|(_, &tvi)| tvi)
            .collect()
    }

    /// Collect the hits of the given terms, filtered by section mask,
    /// sorted newest-document-first and deduplicated.
    pub fn hits_for(&self, tvis: &[u32], section_mask: SectionIdMask) -> Vec<Hit> {
        let mut out: Vec<Hit> = self
            .hits
            .iter()
            .filter(|(tvi, hit)| {
                tvis.contains(tvi) && (section_mask & (1 << hit.section_id)) != 0
            })
            .map(|(_, hit)| *hit)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Group every buffered hit by term, for merging into the main tier.
    pub fn postings(&self) -> impl Iterator<Item = (&str, Vec<Hit>)> {
        let mut grouped: AHashMap<u32, Vec<Hit>> = AHashMap::new();
        for &(tvi, hit) in &self.hits {
            grouped.entry(tvi).or_default().push(hit);
        }
        self.terms.iter().enumerate().filter_map(move |(tvi, term)| {
            grouped
                .remove(&(tvi as u32))
                .map(|hits| (term.as_str(), hits))
        })
    }

    /// Approximate bytes used by the lexicon and the hit buffer.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Number of interned terms.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Number of buffered hits.
    pub fn hit_count(&self) -> usize {
        self.hits.len()
    }

    /// Drop all content, keeping the last-added watermark.
    pub fn clear_content(&mut self) {
        self.lexicon.clear();
        self.terms.clear();
        self.hits.clear();
        self.bytes_used = 0;
    }

    /// Reset to a completely empty state.
    pub fn reset(&mut self) {
        self.clear_content();
        self.last_added_document_id = None;
    }

    /// Deterministic checksum over the tier's content.
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for term in &self.terms {
            hasher.update(term.as_bytes());
            hasher.update(&[0]);
        }
        for (tvi, hit) in &self.hits {
            hasher.update(&tvi.to_le_bytes());
            hasher.update(&hit.document_id.to_le_bytes());
            hasher.update(&[hit.section_id, hit.score]);
        }
        hasher.update(
            &self
                .last_added_document_id
                .map(|id| id as u64 + 1)
                .unwrap_or(0)
                .to_le_bytes(),
        );
        hasher.finalize()
    }

    /// Persist the tier as one checksummed file.
    pub fn persist(&self, storage: &Arc<dyn Storage>, path: &str) -> Result<()> {
        let output = storage.create_output(path)?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(LITE_MAGIC)?;
        writer.write_u64(
            self.last_added_document_id
                .map(|id| id as u64 + 1)
                .unwrap_or(0),
        )?;

        writer.write_varint(self.terms.len() as u64)?;
        for term in &self.terms {
            writer.write_string(term)?;
        }

        writer.write_varint(self.hits.len() as u64)?;
        for (tvi, hit) in &self.hits {
            writer.write_varint(*tvi as u64)?;
            writer.write_varint(hit.document_id as u64)?;
            writer.write_u8(hit.section_id)?;
            writer.write_u8(hit.score)?;
        }

        writer.close()
    }

    /// Load a persisted tier. A missing file is an empty tier; a corrupt
    /// file is an error the caller turns into a rebuild.
    pub fn load(storage: &Arc<dyn Storage>, path: &str) -> Result<LiteIndex> {
        if !storage.file_exists(path) {
            return Ok(LiteIndex::new());
        }

        let input = storage.open_input(path)?;
        let mut reader = StructReader::new(input)?;

        if reader.read_u32()? != LITE_MAGIC {
            return Err(LanternError::data_loss("lite index magic mismatch"));
        }
        let last_added_raw = reader.read_u64()?;

        let term_count = reader.read_varint()? as usize;
        let mut index = LiteIndex::new();
        for _ in 0..term_count {
            let term = reader.read_string()?;
            index.intern_term(&term);
        }

        let hit_count = reader.read_varint()? as usize;
        for _ in 0..hit_count {
            let tvi = reader.read_varint()? as u32;
            let document_id = reader.read_varint()? as DocumentId;
            let section_id = reader.read_u8()?;
            let score = reader.read_u8()?;
            if tvi as usize >= index.terms.len() {
                return Err(LanternError::data_loss("lite index hit references unknown term"));
            }
            index.insert_hit(
                tvi,
                Hit {
                    document_id,
                    section_id,
                    score,
                },
            );
        }

        if !reader.verify_checksum()? {
            return Err(LanternError::data_loss("lite index checksum mismatch"));
        }

        index.last_added_document_id = if last_added_raw == 0 {
            None
        } else {
            Some((last_added_raw - 1) as DocumentId)
        };
        Ok(index)
    }
}
