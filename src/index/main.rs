//! The main index: the large, immutable, on-disk tier.
//!
//! Two files under the index directory: `main.lex`, a sorted term table
//! mapping each term to its posting list, and `main.pl`, an arena of
//! delta-compressed, varint-encoded posting lists. The tier is only ever
//! produced whole, by a merge or a rebuild, and replaced atomically via a
//! directory swap, so readers never observe a half-written state.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::docstore::DocumentId;
use crate::error::{LanternError, Result};
use crate::index::hit::Hit;
use crate::storage::{Storage, StructReader, StructWriter};
use crate::util::varint;

const LEX_FILE: &str = "main.lex";
const PL_FILE: &str = "main.pl";
const MAIN_MAGIC: u32 = 0x3A11_1DE0;

/// Location of one term's posting list in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostingRef {
    /// Byte offset into the arena.
    pub offset: usize,
    /// Encoded length in bytes.
    pub len: usize,
    /// Number of hits in the list.
    pub hit_count: u32,
    /// The term's dense value index within this tier (sorted term order).
    pub tvi: u32,
}

/// The immutable on-disk index tier, loaded eagerly at open.
#[derive(Debug, Default)]
pub struct MainIndex {
    /// Sorted lexicon; prefix seeks are range scans.
    lexicon: BTreeMap<String, PostingRef>,
    /// Concatenated encoded posting lists.
    arena: Vec<u8>,
    /// Largest document-id contained in this tier.
    last_added_document_id: Option<DocumentId>,
}

impl MainIndex {
    /// Create an empty main index.
    pub fn empty() -> Self {
        MainIndex::default()
    }

    /// Open the tier from its directory.
    ///
    /// A missing file set yields an empty tier; a corrupt one yields an
    /// empty tier with the corruption flag set so the caller can schedule a
    /// rebuild.
    pub fn open(storage: &Arc<dyn Storage>, dir: &str) -> (Self, bool) {
        let lex_path = format!("{dir}/{LEX_FILE}");
        let pl_path = format!("{dir}/{PL_FILE}");

        if !storage.file_exists(&lex_path) && !storage.file_exists(&pl_path) {
            return (MainIndex::empty(), false);
        }

        match Self::read_files(storage, &lex_path, &pl_path) {
            Ok(index) => (index, false),
            Err(_) => (MainIndex::empty(), true),
        }
    }

    fn read_files(storage: &Arc<dyn Storage>, lex_path: &str, pl_path: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(pl_path)?)?;
        if reader.read_u32()? != MAIN_MAGIC {
            return Err(LanternError::data_loss("posting arena magic mismatch"));
        }
        let arena = reader.read_bytes()?;
        if !reader.verify_checksum()? {
            return Err(LanternError::data_loss("posting arena checksum mismatch"));
        }

        let mut reader = StructReader::new(storage.open_input(lex_path)?)?;
        if reader.read_u32()? != MAIN_MAGIC {
            return Err(LanternError::data_loss("main lexicon magic mismatch"));
        }
        let last_added_raw = reader.read_u64()?;
        let term_count = reader.read_varint()? as usize;

        let mut lexicon = BTreeMap::new();
        for tvi in 0..term_count {
            let term = reader.read_string()?;
            let offset = reader.read_varint()? as usize;
            let len = reader.read_varint()? as usize;
            let hit_count = reader.read_varint()? as u32;
            if offset + len > arena.len() {
                return Err(LanternError::data_loss("posting list out of arena bounds"));
            }
            lexicon.insert(
                term,
                PostingRef {
                    offset,
                    len,
                    hit_count,
                    tvi: tvi as u32,
                },
            );
        }
        if !reader.verify_checksum()? {
            return Err(LanternError::data_loss("main lexicon checksum mismatch"));
        }

        Ok(MainIndex {
            lexicon,
            arena,
            last_added_document_id: if last_added_raw == 0 {
                None
            } else {
                Some((last_added_raw - 1) as DocumentId)
            },
        })
    }

    /// Write a new tier into `dir` from term → hits postings.
    ///
    /// Hits must already be sorted newest-document-first and deduplicated.
    /// Term value indexes follow sorted term order.
    pub fn build(
        storage: &Arc<dyn Storage>,
        dir: &str,
        postings: &BTreeMap<String, Vec<Hit>>,
        last_added_document_id: Option<DocumentId>,
    ) -> Result<()> {
        let mut arena = Vec::new();
        let mut refs = Vec::with_capacity(postings.len());

        for hits in postings.values() {
            let offset = arena.len();
            encode_posting_list(hits, &mut arena);
            refs.push((offset, arena.len() - offset, hits.len() as u32));
        }

        let mut writer = StructWriter::new(storage.create_output(&format!("{dir}/{PL_FILE}"))?);
        writer.write_u32(MAIN_MAGIC)?;
        writer.write_bytes(&arena)?;
        writer.close()?;

        let mut writer = StructWriter::new(storage.create_output(&format!("{dir}/{LEX_FILE}"))?);
        writer.write_u32(MAIN_MAGIC)?;
        writer.write_u64(last_added_document_id.map(|id| id as u64 + 1).unwrap_or(0))?;
        writer.write_varint(postings.len() as u64)?;
        for (term, (offset, len, hit_count)) in postings.keys().zip(refs) {
            writer.write_string(term)?;
            writer.write_varint(offset as u64)?;
            writer.write_varint(len as u64)?;
            writer.write_varint(hit_count as u64)?;
        }
        writer.close()
    }

    /// The posting ref of an exact term.
    pub fn seek_exact(&self, term: &str) -> Option<&PostingRef> {
        self.lexicon.get(term)
    }

    /// All `(term, ref)` pairs whose term starts with `prefix`.
    pub fn seek_prefix(&self, prefix: &str) -> Vec<(&str, &PostingRef)> {
        self.lexicon
            .range(prefix.to_string()..)
            .take_while(|(term, _)| term.starts_with(prefix))
            .map(|(term, posting_ref)| (term.as_str(), posting_ref))
            .collect()
    }

    /// Decode one posting list from the arena.
    pub fn decode(&self, posting_ref: &PostingRef) -> Result<Vec<Hit>> {
        let slice = &self.arena[posting_ref.offset..posting_ref.offset + posting_ref.len];
        decode_posting_list(slice, posting_ref.hit_count)
    }

    /// Decode the whole tier back into term → hits form, for merging.
    pub fn all_postings(&self) -> Result<BTreeMap<String, Vec<Hit>>> {
        let mut out = BTreeMap::new();
        for (term, posting_ref) in &self.lexicon {
            out.insert(term.clone(), self.decode(posting_ref)?);
        }
        Ok(out)
    }

    /// Number of terms in the lexicon.
    pub fn term_count(&self) -> usize {
        self.lexicon.len()
    }

    /// Largest document-id contained in this tier.
    pub fn last_added_document_id(&self) -> Option<DocumentId> {
        self.last_added_document_id
    }

    /// Deterministic checksum over the tier's content.
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for (term, posting_ref) in &self.lexicon {
            hasher.update(term.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(posting_ref.hit_count).to_le_bytes());
        }
        hasher.update(&self.arena);
        hasher.update(
            &self
                .last_added_document_id
                .map(|id| id as u64 + 1)
                .unwrap_or(0)
                .to_le_bytes(),
        );
        hasher.finalize()
    }
}

/// Encode one posting list: per hit a document-id delta (the first is
/// absolute), a section byte, and a score byte. Deltas are non-negative
/// because hits arrive sorted descending by document-id.
fn encode_posting_list(hits: &[Hit], out: &mut Vec<u8>) {
    let mut prev_doc: Option<DocumentId> = None;
    for hit in hits {
        let delta = match prev_doc {
            None => hit.document_id,
            Some(prev) => prev - hit.document_id,
        };
        out.extend_from_slice(&varint::encode_u32(delta));
        out.push(hit.section_id);
        out.push(hit.score);
        prev_doc = Some(hit.document_id);
    }
}

fn decode_posting_list(mut slice: &[u8], hit_count: u32) -> Result<Vec<Hit>> {
    let mut hits = Vec::with_capacity(hit_count as usize);
    let mut prev_doc: Option<DocumentId> = None;

    for _ in 0..hit_count {
        let (delta, consumed) = varint::decode_u32(slice)?;
        slice = &slice[consumed..];
        if slice.len() < 2 {
            return Err(LanternError::data_loss("truncated posting list"));
        }
        let (section_id, score) = (slice[0], slice[1]);
        slice = &slice[2..];

        let document_id = match prev_doc {
            None => delta,
            Some(prev) => prev
                .checked_sub(delta)
                .ok_or_else(|| LanternError::data_loss("posting list delta underflow"))?,
        };
        hits.push(Hit {
            document_id,
            section_id,
            score,
        });
        prev_doc = Some(document_id);
    }

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn sample_postings() -> BTreeMap<String, Vec<Hit>> {
        let mut postings = BTreeMap::new();
        postings.insert(
            "message".to_string(),
            vec![Hit::new(9, 0), Hit::new(9, 1), Hit::new(4, 0), Hit::new(1, 2)],
        );
        postings.insert("meson".to_string(), vec![Hit::new(3, 0)]);
        postings.insert("note".to_string(), vec![Hit::new(2, 1)]);
        postings
    }

    #[test]
    fn test_posting_list_round_trip() {
        let hits = vec![Hit::new(100, 0), Hit::new(7, 3), Hit::new(7, 5), Hit::new(0, 1)];
        let mut encoded = Vec::new();
        encode_posting_list(&hits, &mut encoded);
        let decoded = decode_posting_list(&encoded, hits.len() as u32).unwrap();
        assert_eq!(decoded, hits);
    }

    #[test]
    fn test_build_and_open() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        MainIndex::build(&storage, "idx", &sample_postings(), Some(9)).unwrap();

        let (index, corrupt) = MainIndex::open(&storage, "idx");
        assert!(!corrupt);
        assert_eq!(index.term_count(), 3);
        assert_eq!(index.last_added_document_id(), Some(9));

        let posting_ref = index.seek_exact("message").unwrap();
        assert_eq!(posting_ref.hit_count, 4);
        let hits = index.decode(posting_ref).unwrap();
        assert_eq!(hits[0], Hit::new(9, 0));
        assert_eq!(hits[3], Hit::new(1, 2));

        assert!(index.seek_exact("missing").is_none());
    }

    #[test]
    fn test_seek_prefix_uses_sorted_range() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        MainIndex::build(&storage, "idx", &sample_postings(), Some(9)).unwrap();
        let (index, _) = MainIndex::open(&storage, "idx");

        let matches = index.seek_prefix("me");
        let terms: Vec<&str> = matches.iter().map(|(term, _)| *term).collect();
        assert_eq!(terms, vec!["message", "meson"]);
        assert!(index.seek_prefix("q").is_empty());
    }

    #[test]
    fn test_missing_dir_is_empty_not_corrupt() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (index, corrupt) = MainIndex::open(&storage, "idx");
        assert!(!corrupt);
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn test_corrupt_lexicon_flags_rebuild() {
        let storage = Arc::new(MemoryStorage::new());
        let dyn_storage: Arc<dyn Storage> = Arc::clone(&storage) as Arc<dyn Storage>;
        MainIndex::build(&dyn_storage, "idx", &sample_postings(), Some(9)).unwrap();

        let mut raw = storage.get_raw("idx/main.lex").unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        storage.put_raw("idx/main.lex", raw);

        let (index, corrupt) = MainIndex::open(&dyn_storage, "idx");
        assert!(corrupt);
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        MainIndex::build(&storage, "idx", &sample_postings(), Some(9)).unwrap();
        let (index, _) = MainIndex::open(&storage, "idx");
        let checksum = index.compute_checksum();

        let mut altered = sample_postings();
        altered.insert("extra".to_string(), vec![Hit::new(10, 0)]);
        MainIndex::build(&storage, "idx2", &altered, Some(10)).unwrap();
        let (index2, _) = MainIndex::open(&storage, "idx2");
        assert_ne!(index2.compute_checksum(), checksum);
    }

    #[test]
    fn test_all_postings_round_trip() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let postings = sample_postings();
        MainIndex::build(&storage, "idx", &postings, Some(9)).unwrap();
        let (index, _) = MainIndex::open(&storage, "idx");
        assert_eq!(index.all_postings().unwrap(), postings);
    }
}
