//! The inverted index facade.
//!
//! Owns the two tiers and the term-id codec. Content goes in through an
//! [`IndexEditor`] (which dedupes hits per document section) and comes out
//! through [`PostingListIterator`]s that yield per-document section masks in
//! descending document-id order, spanning both tiers.

pub mod hit;
pub mod lite;
pub mod main;
pub mod term_id_codec;

use std::sync::Arc;

use ahash::AHashSet;
use tracing::{debug, info};

pub use hit::{DocHitInfo, Hit, TermId, DEFAULT_HIT_SCORE};
pub use lite::LiteIndex;
pub use main::MainIndex;
pub use term_id_codec::{TermIdCodec, TermTier};

use crate::analysis::tokenizer::truncate_token;
use crate::docstore::DocumentId;
use crate::error::{LanternError, Result};
use crate::schema::{SectionId, SectionIdMask, TermMatchType};
use crate::storage::Storage;

/// How the index came back up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexRecovery {
    /// A tier was corrupt; the index is empty and must be restored from the
    /// document log.
    pub rebuild_required: bool,
}

/// The two-tier inverted index.
pub struct Index {
    storage: Arc<dyn Storage>,
    dir: String,
    index_merge_size: usize,
    max_token_length: usize,
    lite: LiteIndex,
    main: MainIndex,
    codec: TermIdCodec,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("dir", &self.dir)
            .field("lite_terms", &self.lite.term_count())
            .field("main_terms", &self.main.term_count())
            .finish()
    }
}

impl Index {
    /// Open the index rooted at `dir`.
    pub fn create(
        storage: Arc<dyn Storage>,
        dir: &str,
        index_merge_size: usize,
        max_token_length: usize,
    ) -> Result<(Self, IndexRecovery)> {
        // A merge interrupted by a crash leaves a staging directory behind;
        // it is never authoritative.
        storage.delete_dir(&format!("{dir}/idx_merge_tmp"))?;

        let live_dir = format!("{dir}/idx");
        let (main, main_corrupt) = MainIndex::open(&storage, &live_dir);
        let (lite, lite_corrupt) = match LiteIndex::load(&storage, &format!("{live_dir}/lite.hb"))
        {
            Ok(lite) => (lite, false),
            Err(_) => (LiteIndex::new(), true),
        };

        let rebuild_required = main_corrupt || lite_corrupt;
        let mut index = Index {
            storage,
            dir: dir.to_string(),
            index_merge_size,
            max_token_length,
            lite,
            main,
            codec: TermIdCodec::new(0),
        };

        if rebuild_required {
            // Drop whatever survived; the controller rebuilds from the log.
            index.clear()?;
        }
        index.codec = TermIdCodec::new(index.main.term_count() as u32);

        Ok((index, IndexRecovery { rebuild_required }))
    }

    fn lite_path(&self) -> String {
        format!("{}/idx/lite.hb", self.dir)
    }

    /// Start adding hits for one `(document, section)` pair.
    pub fn edit(&mut self, document_id: DocumentId, section_id: SectionId) -> IndexEditor<'_> {
        IndexEditor {
            index: self,
            document_id,
            section_id,
            seen: AHashSet::new(),
        }
    }

    /// Whether the lite tier has outgrown its byte budget.
    pub fn wants_merge(&self) -> bool {
        self.lite.bytes_used() >= self.index_merge_size
    }

    /// Drain the lite tier into a freshly built main tier.
    ///
    /// The replacement is staged in a sibling directory and published with a
    /// directory swap, so a crash mid-merge leaves either the old or the new
    /// tier fully intact.
    pub fn merge(&mut self) -> Result<()> {
        let mut postings = self.main.all_postings()?;
        for (term, hits) in self.lite.postings() {
            postings.entry(term.to_string()).or_default().extend(hits);
        }
        for hits in postings.values_mut() {
            hits.sort();
            hits.dedup();
        }

        let live_dir = format!("{}/idx", self.dir);
        let tmp_dir = format!("{}/idx_merge_tmp", self.dir);
        self.storage.delete_dir(&tmp_dir)?;
        MainIndex::build(
            &self.storage,
            &tmp_dir,
            &postings,
            self.last_added_document_id(),
        )?;
        self.storage.swap_dirs(&live_dir, &tmp_dir)?;
        self.storage.delete_dir(&tmp_dir)?;

        let (main, corrupt) = MainIndex::open(&self.storage, &live_dir);
        if corrupt {
            return Err(LanternError::internal("merged main index is unreadable"));
        }
        info!(
            "merged lite index into main: {} terms, {} hits drained",
            main.term_count(),
            self.lite.hit_count()
        );
        self.main = main;
        self.lite.clear_content();
        self.lite.persist(&self.storage, &self.lite_path())?;
        self.codec = TermIdCodec::new(self.main.term_count() as u32);
        Ok(())
    }

    /// Create an iterator over every document matching `term`.
    ///
    /// Yields per-document section masks, newest document first, restricted
    /// to sections selected by `section_mask`. `Prefix` expands the term
    /// through both lexicons.
    pub fn get_iterator(
        &self,
        term: &str,
        section_mask: SectionIdMask,
        term_match_type: TermMatchType,
    ) -> Result<PostingListIterator> {
        let term = truncate_token(term, self.max_token_length);
        let mut hits: Vec<Hit> = Vec::new();

        match term_match_type {
            TermMatchType::Unknown => {
                return Err(LanternError::invalid_argument(
                    "term match type must be exact or prefix",
                ));
            }
            TermMatchType::ExactOnly => {
                if let Some(posting_ref) = self.main.seek_exact(term) {
                    hits.extend(self.main.decode(posting_ref)?);
                }
                if let Some(tvi) = self.lite.seek_exact(term) {
                    hits.extend(self.lite.hits_for(&[tvi], section_mask));
                }
            }
            TermMatchType::Prefix => {
                for (_, posting_ref) in self.main.seek_prefix(term) {
                    hits.extend(self.main.decode(posting_ref)?);
                }
                let tvis = self.lite.seek_prefix(term);
                hits.extend(self.lite.hits_for(&tvis, section_mask));
            }
        }

        hits.retain(|hit| (section_mask & (1 << hit.section_id)) != 0);
        hits.sort();
        hits.dedup();

        let mut infos: Vec<DocHitInfo> = Vec::new();
        for hit in hits {
            match infos.last_mut() {
                Some(info) if info.document_id == hit.document_id => {
                    info.add_section(hit.section_id);
                }
                _ => {
                    let mut info = DocHitInfo::new(hit.document_id);
                    info.add_section(hit.section_id);
                    infos.push(info);
                }
            }
        }

        debug!("iterator for '{term}' covers {} documents", infos.len());
        Ok(PostingListIterator::new(infos))
    }

    /// Largest document-id the index has seen.
    pub fn last_added_document_id(&self) -> Option<DocumentId> {
        match (
            self.lite.last_added_document_id(),
            self.main.last_added_document_id(),
        ) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Record that a document was fed through the indexer, even if none of
    /// its sections produced hits.
    pub fn set_last_added_document_id(&mut self, document_id: DocumentId) {
        self.lite.set_last_added_document_id(document_id);
    }

    /// Persist the mutable tier; the main tier is durable by construction.
    pub fn persist_to_disk(&self) -> Result<()> {
        self.lite.persist(&self.storage, &self.lite_path())
    }

    /// Checksum over both tiers.
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.main.compute_checksum().to_le_bytes());
        hasher.update(&self.lite.compute_checksum().to_le_bytes());
        hasher.finalize()
    }

    /// Delete all index state, in memory and on storage.
    pub fn clear(&mut self) -> Result<()> {
        self.storage.delete_dir(&format!("{}/idx", self.dir))?;
        self.lite.reset();
        self.main = MainIndex::empty();
        self.codec = TermIdCodec::new(0);
        Ok(())
    }
}

/// Adds hits for one `(document, section)` pair, deduplicating terms.
pub struct IndexEditor<'a> {
    index: &'a mut Index,
    document_id: DocumentId,
    section_id: SectionId,
    /// Global term-ids already hit in this section of this document.
    seen: AHashSet<TermId>,
}

impl IndexEditor<'_> {
    /// Add one term occurrence.
    ///
    /// Tokens longer than the configured maximum are quietly truncated;
    /// repeated terms within the section are dropped.
    pub fn add_hit(&mut self, term: &str, score: u8) -> Result<()> {
        let term = truncate_token(term, self.index.max_token_length);
        if term.is_empty() {
            return Ok(());
        }

        let tvi = self.index.lite.intern_term(term);
        let term_id = self.index.codec.global_id(TermTier::Lite, tvi)?;
        if !self.seen.insert(term_id) {
            return Ok(());
        }

        self.index.lite.insert_hit(
            tvi,
            Hit {
                document_id: self.document_id,
                section_id: self.section_id,
                score,
            },
        );
        Ok(())
    }
}

/// Forward-only iterator over matched documents, newest first.
///
/// Not restartable: a new query re-seeks by creating a fresh iterator.
#[derive(Debug)]
pub struct PostingListIterator {
    infos: Vec<DocHitInfo>,
    pos: usize,
}

impl PostingListIterator {
    fn new(infos: Vec<DocHitInfo>) -> Self {
        PostingListIterator { infos, pos: 0 }
    }

    /// Advance to the next matched document.
    pub fn advance(&mut self) -> Option<DocHitInfo> {
        let info = self.infos.get(self.pos).copied();
        self.pos += 1;
        info
    }

    /// Number of documents this iterator will yield in total.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether the iterator yields nothing.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SECTION_ID_MASK_ALL;
    use crate::storage::MemoryStorage;

    fn new_index(storage: &Arc<MemoryStorage>) -> Index {
        let (index, recovery) = Index::create(
            Arc::clone(storage) as Arc<dyn Storage>,
            "index_dir",
            1024 * 1024,
            30,
        )
        .unwrap();
        assert!(!recovery.rebuild_required);
        index
    }

    fn drain(mut iterator: PostingListIterator) -> Vec<DocHitInfo> {
        let mut out = Vec::new();
        while let Some(info) = iterator.advance() {
            out.push(info);
        }
        out
    }

    #[test]
    fn test_editor_dedupes_per_section() {
        let storage = Arc::new(MemoryStorage::new());
        let mut index = new_index(&storage);

        let mut editor = index.edit(0, 0);
        editor.add_hit("hello", 0).unwrap();
        editor.add_hit("hello", 0).unwrap();
        editor.add_hit("world", 0).unwrap();
        drop(editor);

        // Same term in a different section is a distinct hit.
        let mut editor = index.edit(0, 1);
        editor.add_hit("hello", 0).unwrap();
        drop(editor);

        let infos = drain(
            index
                .get_iterator("hello", SECTION_ID_MASK_ALL, TermMatchType::ExactOnly)
                .unwrap(),
        );
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].document_id, 0);
        assert_eq!(infos[0].section_mask, 0b11);
    }

    #[test]
    fn test_iterator_descending_doc_order() {
        let storage = Arc::new(MemoryStorage::new());
        let mut index = new_index(&storage);

        for doc_id in 0..3 {
            let mut editor = index.edit(doc_id, 0);
            editor.add_hit("message", 0).unwrap();
        }

        let infos = drain(
            index
                .get_iterator("message", SECTION_ID_MASK_ALL, TermMatchType::ExactOnly)
                .unwrap(),
        );
        let ids: Vec<_> = infos.iter().map(|i| i.document_id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
    }

    #[test]
    fn test_prefix_spans_both_tiers() {
        let storage = Arc::new(MemoryStorage::new());
        let mut index = new_index(&storage);

        index.edit(0, 0).add_hit("message", 0).unwrap();
        index.merge().unwrap();
        // Post-merge inserts land in the lite tier.
        index.edit(1, 0).add_hit("meson", 0).unwrap();

        let infos = drain(
            index
                .get_iterator("me", SECTION_ID_MASK_ALL, TermMatchType::Prefix)
                .unwrap(),
        );
        let ids: Vec<_> = infos.iter().map(|i| i.document_id).collect();
        assert_eq!(ids, vec![1, 0]);

        // Exact seek still distinguishes the two.
        let infos = drain(
            index
                .get_iterator("message", SECTION_ID_MASK_ALL, TermMatchType::ExactOnly)
                .unwrap(),
        );
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].document_id, 0);
    }

    #[test]
    fn test_section_mask_filters() {
        let storage = Arc::new(MemoryStorage::new());
        let mut index = new_index(&storage);

        index.edit(0, 0).add_hit("term", 0).unwrap();
        index.edit(1, 2).add_hit("term", 0).unwrap();

        let infos = drain(
            index
                .get_iterator("term", 1 << 2, TermMatchType::ExactOnly)
                .unwrap(),
        );
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].document_id, 1);
    }

    #[test]
    fn test_token_truncation_matches_truncated_queries() {
        let storage = Arc::new(MemoryStorage::new());
        let (mut index, _) = Index::create(
            Arc::clone(&storage) as Arc<dyn Storage>,
            "index_dir",
            1024 * 1024,
            1,
        )
        .unwrap();

        index.edit(0, 0).add_hit("message", 0).unwrap();

        // Both "me" and "massage" truncate to "m" and match.
        for query in ["me", "massage"] {
            let infos = drain(
                index
                    .get_iterator(query, SECTION_ID_MASK_ALL, TermMatchType::Prefix)
                    .unwrap(),
            );
            assert_eq!(infos.len(), 1, "query '{query}' should match");
        }
    }

    #[test]
    fn test_merge_threshold() {
        let storage = Arc::new(MemoryStorage::new());
        let (mut index, _) = Index::create(
            Arc::clone(&storage) as Arc<dyn Storage>,
            "index_dir",
            64,
            30,
        )
        .unwrap();

        assert!(!index.wants_merge());
        for doc_id in 0..8 {
            let mut editor = index.edit(doc_id, 0);
            editor.add_hit(&format!("term{doc_id}"), 0).unwrap();
        }
        assert!(index.wants_merge());

        index.merge().unwrap();
        assert!(!index.wants_merge());
        assert_eq!(index.last_added_document_id(), Some(7));

        let infos = drain(
            index
                .get_iterator("term3", SECTION_ID_MASK_ALL, TermMatchType::ExactOnly)
                .unwrap(),
        );
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].document_id, 3);
    }

    #[test]
    fn test_persist_and_reopen() {
        let storage = Arc::new(MemoryStorage::new());
        let checksum = {
            let mut index = new_index(&storage);
            index.edit(0, 0).add_hit("alpha", 0).unwrap();
            index.edit(1, 0).add_hit("beta", 0).unwrap();
            index.merge().unwrap();
            index.edit(2, 0).add_hit("gamma", 0).unwrap();
            index.persist_to_disk().unwrap();
            index.compute_checksum()
        };

        let (index, recovery) = Index::create(
            Arc::clone(&storage) as Arc<dyn Storage>,
            "index_dir",
            1024 * 1024,
            30,
        )
        .unwrap();
        assert!(!recovery.rebuild_required);
        assert_eq!(index.compute_checksum(), checksum);
        assert_eq!(index.last_added_document_id(), Some(2));

        let infos = drain(
            index
                .get_iterator("gamma", SECTION_ID_MASK_ALL, TermMatchType::ExactOnly)
                .unwrap(),
        );
        assert_eq!(infos.len(), 1);
    }

    #[test]
    fn test_corrupt_lite_forces_rebuild() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let mut index = new_index(&storage);
            index.edit(0, 0).add_hit("alpha", 0).unwrap();
            index.persist_to_disk().unwrap();
        }

        let mut raw = storage.get_raw("index_dir/idx/lite.hb").unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0xFF;
        storage.put_raw("index_dir/idx/lite.hb", raw);

        let (index, recovery) = Index::create(
            Arc::clone(&storage) as Arc<dyn Storage>,
            "index_dir",
            1024 * 1024,
            30,
        )
        .unwrap();
        assert!(recovery.rebuild_required);
        assert_eq!(index.last_added_document_id(), None);
    }
}
