//! The search engine controller.
//!
//! Composes the schema store, document store, and index behind one coarse
//! lock, owns the startup/recovery sequence, and implements the public
//! operations. Every operation other than `initialize` and `reset` requires
//! the engine to be ready.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::analysis::{PlainTokenizer, Tokenizer, VerbatimTokenizer};
use crate::clock::Clock;
use crate::docstore::{
    DataStatus, DocumentId, DocumentStore, OptimizeInfo, UsageReport,
};
use crate::document::Document;
use crate::engine::header;
use crate::engine::options::EngineOptions;
use crate::engine::stats::{InitializeStats, OptimizeStats, RecoveryCause};
use crate::error::{LanternError, Result};
use crate::index::{Index, DEFAULT_HIT_SCORE};
use crate::query::{
    self, compute_snippets, parse_query, NextPageTokenTable, PageResultState, ParsedQuery,
    ResultSpec, ScoringSpec, SearchResult, SearchResults, SearchSpec,
};
use crate::schema::{Schema, SchemaStore, SchemaType, SetSchemaResult, TokenizerKind};
use crate::storage::Storage;

const SCHEMA_DIR: &str = "schema_dir";
const DOCUMENT_DIR: &str = "document_dir";
const DOCUMENT_OPTIMIZE_TMP_DIR: &str = "document_dir_optimize_tmp";
const INDEX_DIR: &str = "index_dir";

/// The engine state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EngineState {
    Uninitialized,
    Ready,
}

/// The embeddable search engine.
///
/// All operations are synchronous and serialized through one internal lock,
/// preserving a single linear history even under concurrent callers.
pub struct SearchEngine {
    inner: Mutex<EngineInner>,
}

struct EngineInner {
    options: EngineOptions,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    tokenizer: PlainTokenizer,
    state: EngineState,
    stores: Option<Stores>,
}

struct Stores {
    schema: SchemaStore,
    docs: DocumentStore,
    index: Index,
    page_tokens: NextPageTokenTable,
}

impl SearchEngine {
    /// Create an engine over the given storage and clock capabilities.
    ///
    /// Nothing is opened until [`initialize`](Self::initialize).
    pub fn new(options: EngineOptions, storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        SearchEngine {
            inner: Mutex::new(EngineInner {
                options,
                storage,
                clock,
                tokenizer: PlainTokenizer::new(),
                state: EngineState::Uninitialized,
                stores: None,
            }),
        }
    }

    /// Open or recover all subsystems. Idempotent once ready.
    pub fn initialize(&self) -> Result<InitializeStats> {
        self.inner.lock().initialize()
    }

    /// Set or replace the schema.
    pub fn set_schema(
        &self,
        schema: Schema,
        ignore_errors_and_delete_documents: bool,
    ) -> Result<SetSchemaResult> {
        self.inner
            .lock()
            .set_schema(schema, ignore_errors_and_delete_documents)
    }

    /// Get the current schema.
    pub fn get_schema(&self) -> Result<Schema> {
        let mut inner = self.inner.lock();
        Ok(inner.ready()?.schema.get_schema()?.clone())
    }

    /// Get one schema type by name.
    pub fn get_schema_type(&self, name: &str) -> Result<SchemaType> {
        let mut inner = self.inner.lock();
        Ok(inner.ready()?.schema.get_schema_type(name)?.clone())
    }

    /// Insert or replace a document.
    pub fn put(&self, document: Document) -> Result<()> {
        self.inner.lock().put(document)
    }

    /// Fetch a document by identity.
    pub fn get(&self, namespace: &str, uri: &str) -> Result<Document> {
        let mut inner = self.inner.lock();
        inner.ready()?.docs.get(namespace, uri)
    }

    /// Delete a document by identity.
    pub fn delete(&self, namespace: &str, uri: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ready()?.docs.delete(namespace, uri)
    }

    /// Delete every document in a namespace.
    pub fn delete_by_namespace(&self, namespace: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ready()?.docs.delete_by_namespace(namespace)?;
        Ok(())
    }

    /// Delete every document of a schema type.
    pub fn delete_by_schema_type(&self, schema_type: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ready()?.docs.delete_by_schema_type(schema_type)?;
        Ok(())
    }

    /// Delete every document matching a query.
    pub fn delete_by_query(&self, search_spec: SearchSpec) -> Result<u64> {
        self.inner.lock().delete_by_query(search_spec)
    }

    /// Record a usage event.
    pub fn report_usage(&self, report: UsageReport) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ready()?.docs.report_usage(&report)
    }

    /// Namespaces currently holding at least one observable document.
    pub fn get_all_namespaces(&self) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        Ok(inner.ready()?.docs.get_all_namespaces())
    }

    /// Run a query and return the first page.
    pub fn search(
        &self,
        search_spec: SearchSpec,
        scoring_spec: ScoringSpec,
        result_spec: ResultSpec,
    ) -> Result<SearchResults> {
        self.inner.lock().search(search_spec, scoring_spec, result_spec)
    }

    /// Return the next page for a token minted by [`search`](Self::search).
    pub fn get_next_page(&self, next_page_token: u64) -> Result<SearchResults> {
        self.inner.lock().get_next_page(next_page_token)
    }

    /// Drop a next-page token without consuming its pages.
    pub fn invalidate_next_page_token(&self, next_page_token: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ready()?.page_tokens.invalidate(next_page_token);
        Ok(())
    }

    /// Compact the document store and rebuild the index.
    pub fn optimize(&self) -> Result<OptimizeStats> {
        self.inner.lock().optimize()
    }

    /// What an `optimize` would reclaim right now.
    pub fn get_optimize_info(&self) -> Result<OptimizeInfo> {
        let mut inner = self.inner.lock();
        Ok(inner.ready()?.docs.get_optimize_info())
    }

    /// Flush every subsystem and rewrite the header.
    pub fn persist_to_disk(&self) -> Result<()> {
        self.inner.lock().persist_to_disk()
    }

    /// Delete all engine data and reinitialize empty.
    pub fn reset(&self) -> Result<()> {
        self.inner.lock().reset()
    }
}

impl EngineInner {
    fn ready(&mut self) -> Result<&mut Stores> {
        if self.state != EngineState::Ready {
            return Err(LanternError::failed_precondition(
                "engine is not initialized",
            ));
        }
        self.stores
            .as_mut()
            .ok_or_else(|| LanternError::failed_precondition("engine is not initialized"))
    }

    fn initialize(&mut self) -> Result<InitializeStats> {
        if self.state == EngineState::Ready {
            return Ok(InitializeStats::default());
        }
        self.options.validate()?;

        // Scratch space from an interrupted optimize is never authoritative.
        self.storage.delete_dir(DOCUMENT_OPTIMIZE_TMP_DIR)?;

        let mut stats = InitializeStats::default();
        let stored_header = header::read(&self.storage);

        let (schema, schema_recovered) = SchemaStore::create(Arc::clone(&self.storage))?;
        if schema_recovered {
            stats.schema_store_recovery_cause = RecoveryCause::IoError;
        }

        let (docs, doc_recovery) = DocumentStore::create(
            Arc::clone(&self.storage),
            Arc::clone(&self.clock),
            DOCUMENT_DIR,
        )?;
        stats.document_store_data_status = doc_recovery.data_status;
        if doc_recovery.data_status != DataStatus::NoDataLoss {
            stats.document_store_recovery_cause = RecoveryCause::DataLoss;
        } else if doc_recovery.derived_maps_replayed {
            stats.document_store_recovery_cause = RecoveryCause::IoError;
        }

        let (index, index_recovery) = Index::create(
            Arc::clone(&self.storage),
            INDEX_DIR,
            self.options.index_merge_size,
            self.options.max_token_length,
        )?;
        if index_recovery.rebuild_required {
            stats.index_restoration_cause = RecoveryCause::IoError;
        }

        let mut stores = Stores {
            schema,
            docs,
            index,
            page_tokens: NextPageTokenTable::new(),
        };

        // Cross-validation. The index must cover exactly the documents the
        // log knows about, and the header must cover all three subsystems.
        let mut restore_index = index_recovery.rebuild_required;
        if stores.index.last_added_document_id() != stores.docs.last_added_document_id() {
            if stats.index_restoration_cause == RecoveryCause::None {
                stats.index_restoration_cause = RecoveryCause::InconsistentWithGroundTruth;
            }
            restore_index = true;
        }
        match stored_header {
            Some(stored) => {
                let current = header::combined_checksum(
                    stores.schema.compute_checksum(),
                    stores.docs.compute_checksum(),
                    stores.index.compute_checksum(),
                );
                if stored != current && !restore_index {
                    stats.index_restoration_cause = RecoveryCause::TotalChecksumMismatch;
                    if stats.document_store_recovery_cause == RecoveryCause::None {
                        stats.document_store_recovery_cause =
                            RecoveryCause::TotalChecksumMismatch;
                    }
                    restore_index = true;
                }
            }
            None => {
                // Missing or unreadable header: the subsystems cannot be
                // cross-checked, so reconcile the index with the log.
                if stores.docs.last_added_document_id().is_some() && !restore_index {
                    stats.index_restoration_cause = RecoveryCause::TotalChecksumMismatch;
                    restore_index = true;
                }
            }
        }

        if restore_index {
            info!("restoring index from the document log");
            restore_index_from_log(&mut stores, &self.options, &self.tokenizer)?;
        }

        write_header(&self.storage, &stores)?;
        self.stores = Some(stores);
        self.state = EngineState::Ready;
        info!("engine initialized");
        Ok(stats)
    }

    fn set_schema(
        &mut self,
        schema: Schema,
        ignore_errors_and_delete_documents: bool,
    ) -> Result<SetSchemaResult> {
        let options = self.options;
        let tokenizer = self.tokenizer.clone();
        let storage = Arc::clone(&self.storage);
        let stores = self.ready()?;
        let result = stores
            .schema
            .set_schema(schema, ignore_errors_and_delete_documents)?;

        // A forced incompatible change orphans the documents of the named
        // types; they go with it.
        for type_name in &result.incompatible_schema_types {
            match stores.docs.delete_by_schema_type(type_name) {
                Ok(_) | Err(LanternError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if result.index_incompatible {
            info!("schema change rearranged sections; restoring index");
            restore_index_from_log(stores, &options, &tokenizer)?;
        }

        // Ranked cursors were built against the old schema.
        stores.page_tokens.clear();
        write_header(&storage, stores)?;
        Ok(result)
    }

    fn put(&mut self, document: Document) -> Result<()> {
        let options = self.options;
        let tokenizer = self.tokenizer.clone();
        let stores = self.ready()?;

        let (doc_id, stored) = stores.docs.put(document, &stores.schema)?;
        index_document(stores, &options, &tokenizer, doc_id, &stored)?;

        if stores.index.wants_merge() {
            stores.index.merge()?;
        }
        Ok(())
    }

    fn delete_by_query(&mut self, search_spec: SearchSpec) -> Result<u64> {
        let tokenizer = self.tokenizer.clone();
        let max_token_length = self.options.max_token_length;
        let stores = self.ready()?;

        let parsed = parse_truncated(&search_spec.query, &tokenizer, max_token_length)?;
        let candidates = query::execute(
            &stores.index,
            &stores.docs,
            &stores.schema,
            &parsed,
            &search_spec,
        )?;
        let doc_ids: Vec<DocumentId> = candidates.into_iter().map(|(id, _)| id).collect();
        stores.docs.delete_documents(&doc_ids)
    }

    fn search(
        &mut self,
        search_spec: SearchSpec,
        scoring_spec: ScoringSpec,
        result_spec: ResultSpec,
    ) -> Result<SearchResults> {
        if result_spec.num_per_page < 0 {
            return Err(LanternError::invalid_argument(
                "num_per_page must not be negative",
            ));
        }
        let tokenizer = self.tokenizer.clone();
        let max_token_length = self.options.max_token_length;
        let stores = self.ready()?;

        let parsed = parse_truncated(&search_spec.query, &tokenizer, max_token_length)?;
        let candidates = query::execute(
            &stores.index,
            &stores.docs,
            &stores.schema,
            &parsed,
            &search_spec,
        )?;

        let mut hits = query::score_candidates(candidates, scoring_spec.rank_by, &stores.docs);
        query::rank_hits(&mut hits, scoring_spec.order_by);

        let state = PageResultState {
            remaining: hits,
            parsed,
            term_match_type: search_spec.term_match_type,
            result_spec,
            num_returned: 0,
        };
        render_page(stores, &tokenizer, state, None)
    }

    fn get_next_page(&mut self, next_page_token: u64) -> Result<SearchResults> {
        let tokenizer = self.tokenizer.clone();
        let stores = self.ready()?;

        let Some(state) = stores.page_tokens.take(next_page_token) else {
            return Ok(SearchResults::empty());
        };
        render_page(stores, &tokenizer, state, Some(next_page_token))
    }

    fn optimize(&mut self) -> Result<OptimizeStats> {
        let options = self.options;
        let tokenizer = self.tokenizer.clone();
        let storage = Arc::clone(&self.storage);
        let clock = Arc::clone(&self.clock);

        let mut stats = OptimizeStats::default();
        {
            let stores = self.ready()?;

            // Everything must be durable before directories start moving.
            stores.docs.persist_to_disk()?;
            stores.index.persist_to_disk()?;
            stats.num_original_documents = stores.docs.num_documents() as u64;
            stats.log_size_before = stores.docs.document_log_size();

            storage.delete_dir(DOCUMENT_OPTIMIZE_TMP_DIR)?;
            match stores.docs.optimize_into(DOCUMENT_OPTIMIZE_TMP_DIR) {
                Ok((compacted, _)) => drop(compacted),
                Err(e) => {
                    // Nothing live was touched; the engine stays usable.
                    storage.delete_dir(DOCUMENT_OPTIMIZE_TMP_DIR)?;
                    return Err(LanternError::aborted(format!(
                        "optimize left the store untouched: {e}"
                    )));
                }
            }
        }

        storage.swap_dirs(DOCUMENT_DIR, DOCUMENT_OPTIMIZE_TMP_DIR)?;
        storage.delete_dir(DOCUMENT_OPTIMIZE_TMP_DIR)?;

        // Reopen the published store and rebuild the index against the
        // renumbered document-ids.
        match DocumentStore::create(Arc::clone(&storage), clock, DOCUMENT_DIR) {
            Ok((docs, recovery)) => {
                let stores = self.ready()?;
                stores.docs = docs;
                if recovery.data_status != DataStatus::NoDataLoss {
                    warn!("optimize recovered with data loss");
                }
            }
            Err(e) => {
                self.state = EngineState::Uninitialized;
                self.stores = None;
                return Err(LanternError::internal(format!(
                    "document store unusable after optimize: {e}"
                )));
            }
        }

        let stores = self.ready()?;
        restore_index_from_log(stores, &options, &tokenizer)?;
        stores.page_tokens.clear();
        write_header(&storage, stores)?;

        stats.num_retained_documents = stores.docs.num_documents() as u64;
        stats.log_size_after = stores.docs.document_log_size();
        info!(
            "optimize reclaimed {} bytes",
            stats.log_size_before.saturating_sub(stats.log_size_after)
        );
        Ok(stats)
    }

    fn persist_to_disk(&mut self) -> Result<()> {
        let storage = Arc::clone(&self.storage);
        let stores = self.ready()?;
        stores.schema.persist_to_disk()?;
        stores.docs.persist_to_disk()?;
        stores.index.persist_to_disk()?;
        write_header(&storage, stores)?;
        self.storage.sync()
    }

    fn reset(&mut self) -> Result<()> {
        self.state = EngineState::Uninitialized;
        self.stores = None;

        let dirs = [
            SCHEMA_DIR,
            DOCUMENT_DIR,
            DOCUMENT_OPTIMIZE_TMP_DIR,
            INDEX_DIR,
        ];
        for (i, dir) in dirs.iter().enumerate() {
            if let Err(e) = self.storage.delete_dir(dir) {
                // Failing on the very first directory means nothing was
                // touched yet; later failures leave a partial wipe behind.
                return Err(if i == 0 {
                    LanternError::aborted(format!("reset left the engine untouched: {e}"))
                } else {
                    LanternError::internal(format!("reset failed deleting {dir}: {e}"))
                });
            }
        }
        self.storage.delete_file(header::HEADER_FILE)?;

        self.initialize()?;
        Ok(())
    }
}

/// Recompute the combined checksum and rewrite the header file.
fn write_header(storage: &Arc<dyn Storage>, stores: &Stores) -> Result<()> {
    let checksum = header::combined_checksum(
        stores.schema.compute_checksum(),
        stores.docs.compute_checksum(),
        stores.index.compute_checksum(),
    );
    header::write(storage, checksum)
}

/// Tokenize one document into the index through an editor per section.
fn index_document(
    stores: &mut Stores,
    options: &EngineOptions,
    tokenizer: &PlainTokenizer,
    doc_id: DocumentId,
    document: &Document,
) -> Result<()> {
    let sections = stores.schema.sections_of(&document.schema_type)?.to_vec();
    let mut token_budget = options.max_tokens_per_doc;

    'sections: for section in &sections {
        let mut editor = stores.index.edit(doc_id, section.id);
        for value in document.string_values(&section.property_name) {
            let tokens = match section.indexing.tokenizer {
                TokenizerKind::Plain => tokenizer.tokenize(value)?,
                TokenizerKind::Verbatim => VerbatimTokenizer::new().tokenize(value)?,
                TokenizerKind::None => continue,
            };
            for token in tokens {
                if token_budget == 0 {
                    break 'sections;
                }
                token_budget -= 1;
                editor.add_hit(&token.text, DEFAULT_HIT_SCORE)?;
            }
        }
    }

    stores.index.set_last_added_document_id(doc_id);
    Ok(())
}

/// Rebuild the index from scratch by replaying every observable document.
fn restore_index_from_log(
    stores: &mut Stores,
    options: &EngineOptions,
    tokenizer: &PlainTokenizer,
) -> Result<()> {
    stores.index.clear()?;
    for doc_id in 0..stores.docs.num_documents() as DocumentId {
        if !stores.docs.is_alive(doc_id) {
            continue;
        }
        let document = stores.docs.get_document(doc_id)?;
        // Types the current schema no longer declares are skipped; their
        // documents are unreachable through search anyway.
        if stores.schema.get_schema_type(&document.schema_type).is_err() {
            continue;
        }
        index_document(stores, options, tokenizer, doc_id, &document)?;
        if stores.index.wants_merge() {
            stores.index.merge()?;
        }
    }
    if let Some(last) = stores.docs.last_added_document_id() {
        stores.index.set_last_added_document_id(last);
    }
    stores.index.persist_to_disk()
}

/// Parse a query and truncate its terms the way indexing truncates tokens.
fn parse_truncated(
    raw: &str,
    tokenizer: &PlainTokenizer,
    max_token_length: usize,
) -> Result<ParsedQuery> {
    let mut parsed = parse_query(raw, tokenizer)?;
    for term in &mut parsed.terms {
        term.text.truncate(
            crate::analysis::tokenizer::truncate_token(&term.text, max_token_length).len(),
        );
    }
    Ok(parsed)
}

/// Render the next page out of a paginator state and re-park the remainder.
fn render_page(
    stores: &mut Stores,
    tokenizer: &PlainTokenizer,
    mut state: PageResultState,
    reuse_token: Option<u64>,
) -> Result<SearchResults> {
    let per_page = state.result_spec.num_per_page as usize;
    let mut results = Vec::new();

    while results.len() < per_page && !state.remaining.is_empty() {
        let hit = state.remaining.remove(0);
        // A document may have been deleted or expired since ranking.
        if !stores.docs.is_alive(hit.document_id) {
            continue;
        }
        let document = stores.docs.get_document(hit.document_id)?;

        let snippet_budget = (state.result_spec.num_to_snippet as usize)
            .saturating_sub(state.num_returned + results.len());
        let snippets = if snippet_budget > 0 {
            let sections = stores.schema.sections_of(&document.schema_type)?;
            compute_snippets(
                &document,
                sections,
                &state.parsed,
                state.term_match_type,
                &state.result_spec,
                tokenizer,
            )?
        } else {
            Vec::new()
        };

        results.push(SearchResult { document, snippets });
    }

    state.num_returned += results.len();
    let next_page_token = if state.remaining.is_empty() {
        0
    } else {
        match reuse_token {
            Some(token) => {
                stores.page_tokens.reinsert(token, state);
                token
            }
            None => stores.page_tokens.insert(state),
        }
    };

    Ok(SearchResults {
        results,
        next_page_token,
    })
}
