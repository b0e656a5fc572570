//! The document store.
//!
//! Ground truth is the append-only [`DocumentLog`]; everything else (the
//! key mapper, the per-document entry array, the namespace mapper, usage
//! counters) is derived and can be rebuilt by replay. The derived state is
//! persisted on `persist_to_disk` so a clean restart skips the replay.

use std::sync::Arc;

use ahash::AHashMap;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::docstore::log::{DataStatus, DocumentLog, LogRecord};
use crate::docstore::usage::{UsageReport, UsageScores, UsageStore};
use crate::document::Document;
use crate::error::{LanternError, Result};
use crate::schema::SchemaStore;
use crate::storage::{Storage, StructReader, StructWriter};

/// Dense identifier assigned to each inserted document.
pub type DocumentId = u32;

/// The largest assignable document-id (24-bit space).
pub const MAX_DOCUMENT_ID: DocumentId = (1 << 24) - 1;

/// The largest accepted serialized document, in bytes.
pub const MAX_DOCUMENT_SIZE: usize = (1 << 24) - 1;

const LOG_FILE: &str = "document_log";
const DERIVED_FILE: &str = "derived_maps";
const DERIVED_MAGIC: u32 = 0xD0C5_70FE;

/// Derived per-document state, indexed by document-id.
#[derive(Clone, Debug)]
pub struct DocumentEntry {
    /// Offset of the document's `Put` record in the log.
    pub log_offset: u64,
    /// Encoded length of that record.
    pub record_len: u32,
    /// Whether the document has been tombstoned.
    pub deleted: bool,
    /// Dense id of the document's namespace.
    pub namespace_id: u32,
    /// The document's uri.
    pub uri: String,
    /// The document's schema type name.
    pub schema_type: String,
    /// Creation timestamp, milliseconds.
    pub creation_time_ms: i64,
    /// Time-to-live, milliseconds; zero never expires.
    pub ttl_ms: i64,
    /// Client-assigned document score.
    pub score: i32,
}

impl DocumentEntry {
    fn is_expired_at(&self, now_ms: i64) -> bool {
        self.ttl_ms > 0 && now_ms >= self.creation_time_ms.saturating_add(self.ttl_ms)
    }
}

/// How the store came back up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DocStoreRecovery {
    /// What the log itself lost.
    pub data_status: DataStatus,
    /// Whether the derived maps had to be rebuilt by replaying the log.
    pub derived_maps_replayed: bool,
}

/// Summary returned by [`DocumentStore::get_optimize_info`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptimizeInfo {
    /// Documents that compaction would drop.
    pub optimizable_docs: u64,
    /// Log bytes those documents occupy.
    pub estimated_optimizable_bytes: u64,
}

/// The document store.
pub struct DocumentStore {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    dir: String,
    log: DocumentLog,
    /// namespace_id → namespace name.
    namespaces: Vec<String>,
    namespace_ids: AHashMap<String, u32>,
    /// (namespace_id, uri) → live document-id.
    key_mapper: AHashMap<(u32, String), DocumentId>,
    entries: Vec<DocumentEntry>,
    usage: UsageStore,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("dir", &self.dir)
            .field("documents", &self.entries.len())
            .finish()
    }
}

impl DocumentStore {
    /// Open the document store rooted at `dir`.
    pub fn create(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        dir: &str,
    ) -> Result<(Self, DocStoreRecovery)> {
        let log_path = format!("{dir}/{LOG_FILE}");
        let (log, records, data_status) = DocumentLog::open(Arc::clone(&storage), &log_path)?;

        let mut store = DocumentStore {
            storage,
            clock,
            dir: dir.to_string(),
            log,
            namespaces: Vec::new(),
            namespace_ids: AHashMap::new(),
            key_mapper: AHashMap::new(),
            entries: Vec::new(),
            usage: UsageStore::new(),
        };

        let mut recovery = DocStoreRecovery {
            data_status,
            derived_maps_replayed: false,
        };

        if data_status == DataStatus::NoDataLoss && store.load_derived_maps().unwrap_or(false) {
            debug!("document store restored from derived maps");
        } else {
            recovery.derived_maps_replayed = true;
            info!(
                "rebuilding document store derived maps from {} log records",
                records.len()
            );
            store.replay(&records);
        }

        Ok((store, recovery))
    }

    /// Replay log records into fresh derived maps.
    fn replay(&mut self, records: &[(u64, LogRecord)]) {
        self.namespaces.clear();
        self.namespace_ids.clear();
        self.key_mapper.clear();
        self.entries.clear();

        for (i, (offset, record)) in records.iter().enumerate() {
            let end = records
                .get(i + 1)
                .map(|(next, _)| *next)
                .unwrap_or_else(|| self.log.size());
            let record_len = (end - offset) as u32;
            self.apply_record(record, *offset, record_len);
        }
    }

    fn apply_record(&mut self, record: &LogRecord, offset: u64, record_len: u32) {
        match record {
            LogRecord::Put { document } => {
                self.apply_put(document, offset, record_len);
            }
            LogRecord::Delete { namespace, uri } => {
                if let Some(doc_id) = self.lookup_any(namespace, uri) {
                    self.entries[doc_id as usize].deleted = true;
                    self.key_mapper
                        .remove(&(self.entries[doc_id as usize].namespace_id, uri.clone()));
                }
            }
            LogRecord::DeleteNamespace { namespace } => {
                if let Some(&ns_id) = self.namespace_ids.get(namespace) {
                    for entry in &mut self.entries {
                        if entry.namespace_id == ns_id {
                            entry.deleted = true;
                        }
                    }
                    self.key_mapper.retain(|(id, _), _| *id != ns_id);
                }
            }
            LogRecord::DeleteType { schema_type } => {
                let mut removed = Vec::new();
                for (doc_id, entry) in self.entries.iter_mut().enumerate() {
                    if entry.schema_type == *schema_type && !entry.deleted {
                        entry.deleted = true;
                        removed.push((entry.namespace_id, entry.uri.clone(), doc_id));
                    }
                }
                for (ns_id, uri, doc_id) in removed {
                    if self.key_mapper.get(&(ns_id, uri.clone())) == Some(&(doc_id as u32)) {
                        self.key_mapper.remove(&(ns_id, uri));
                    }
                }
            }
        }
    }

    fn apply_put(&mut self, document: &Document, offset: u64, record_len: u32) -> DocumentId {
        let namespace_id = self.intern_namespace(&document.namespace);

        if let Some(&old_id) = self.key_mapper.get(&(namespace_id, document.uri.clone())) {
            self.entries[old_id as usize].deleted = true;
        }

        let doc_id = self.entries.len() as DocumentId;
        self.entries.push(DocumentEntry {
            log_offset: offset,
            record_len,
            deleted: false,
            namespace_id,
            uri: document.uri.clone(),
            schema_type: document.schema_type.clone(),
            creation_time_ms: document.creation_time_ms,
            ttl_ms: document.ttl_ms,
            score: document.score,
        });
        self.key_mapper
            .insert((namespace_id, document.uri.clone()), doc_id);
        doc_id
    }

    fn intern_namespace(&mut self, namespace: &str) -> u32 {
        if let Some(&id) = self.namespace_ids.get(namespace) {
            return id;
        }
        let id = self.namespaces.len() as u32;
        self.namespaces.push(namespace.to_string());
        self.namespace_ids.insert(namespace.to_string(), id);
        id
    }

    /// Live document-id for an identity, ignoring TTL.
    fn lookup_any(&self, namespace: &str, uri: &str) -> Option<DocumentId> {
        let ns_id = *self.namespace_ids.get(namespace)?;
        self.key_mapper.get(&(ns_id, uri.to_string())).copied()
    }

    /// Live, unexpired document-id for an identity.
    fn lookup_alive(&self, namespace: &str, uri: &str) -> Option<DocumentId> {
        let doc_id = self.lookup_any(namespace, uri)?;
        self.is_alive(doc_id).then_some(doc_id)
    }

    /// Insert or replace a document.
    ///
    /// The document is validated against the schema first. Returns the
    /// assigned document-id together with the document as stored (creation
    /// time filled in when the caller left it zero).
    pub fn put(
        &mut self,
        mut document: Document,
        schema_store: &SchemaStore,
    ) -> Result<(DocumentId, Document)> {
        document.validate(schema_store)?;

        if document.creation_time_ms == 0 {
            document.creation_time_ms = self.clock.now_ms();
        }

        let serialized_size = serde_json::to_vec(&document)?.len();
        if serialized_size >= MAX_DOCUMENT_SIZE {
            return Err(LanternError::out_of_space(format!(
                "document of {serialized_size} bytes exceeds the maximum of {MAX_DOCUMENT_SIZE}"
            )));
        }
        if self.entries.len() as u64 > MAX_DOCUMENT_ID as u64 {
            return Err(LanternError::out_of_space(
                "document-id space exhausted; run optimize",
            ));
        }

        let record = LogRecord::Put {
            document: document.clone(),
        };
        let (offset, record_len) = self.log.append(&record)?;
        let doc_id = self.apply_put(&document, offset, record_len);
        Ok((doc_id, document))
    }

    /// Fetch an observable document by identity.
    pub fn get(&self, namespace: &str, uri: &str) -> Result<Document> {
        let doc_id = self.lookup_alive(namespace, uri).ok_or_else(|| {
            LanternError::not_found(format!("document ({namespace}, {uri}) not found"))
        })?;
        self.get_document(doc_id)
    }

    /// Fetch an observable document by id.
    pub fn get_document(&self, doc_id: DocumentId) -> Result<Document> {
        if !self.is_alive(doc_id) {
            return Err(LanternError::not_found(format!(
                "document id {doc_id} is not observable"
            )));
        }
        let entry = &self.entries[doc_id as usize];
        match self.log.read_at(entry.log_offset)? {
            LogRecord::Put { document } => Ok(document),
            _ => Err(LanternError::internal(format!(
                "document id {doc_id} points at a non-document record"
            ))),
        }
    }

    /// Whether a document-id refers to a live, unexpired document.
    pub fn is_alive(&self, doc_id: DocumentId) -> bool {
        let Some(entry) = self.entries.get(doc_id as usize) else {
            return false;
        };
        !entry.deleted && !entry.is_expired_at(self.clock.now_ms())
    }

    /// The derived entry for a document-id, observable or not.
    pub fn entry(&self, doc_id: DocumentId) -> Option<&DocumentEntry> {
        self.entries.get(doc_id as usize)
    }

    /// The namespace name for a dense namespace id.
    pub fn namespace_name(&self, namespace_id: u32) -> Option<&str> {
        self.namespaces.get(namespace_id as usize).map(|s| s.as_str())
    }

    /// The dense namespace id for a name, if any document ever used it.
    pub fn namespace_id(&self, namespace: &str) -> Option<u32> {
        self.namespace_ids.get(namespace).copied()
    }

    /// Tombstone a document by identity.
    pub fn delete(&mut self, namespace: &str, uri: &str) -> Result<()> {
        let doc_id = self.lookup_alive(namespace, uri).ok_or_else(|| {
            LanternError::not_found(format!("document ({namespace}, {uri}) not found"))
        })?;
        self.log.append(&LogRecord::Delete {
            namespace: namespace.to_string(),
            uri: uri.to_string(),
        })?;
        let ns_id = self.entries[doc_id as usize].namespace_id;
        self.entries[doc_id as usize].deleted = true;
        self.key_mapper.remove(&(ns_id, uri.to_string()));
        Ok(())
    }

    /// Tombstone every observable document in a namespace.
    pub fn delete_by_namespace(&mut self, namespace: &str) -> Result<u64> {
        let doomed = self.observable_ids(|entry| {
            self.namespace_ids.get(namespace) == Some(&entry.namespace_id)
        });
        if doomed.is_empty() {
            return Err(LanternError::not_found(format!(
                "no documents in namespace '{namespace}'"
            )));
        }
        self.log.append(&LogRecord::DeleteNamespace {
            namespace: namespace.to_string(),
        })?;
        self.tombstone(&doomed);
        Ok(doomed.len() as u64)
    }

    /// Tombstone every observable document of a schema type.
    pub fn delete_by_schema_type(&mut self, schema_type: &str) -> Result<u64> {
        let doomed = self.observable_ids(|entry| entry.schema_type == schema_type);
        if doomed.is_empty() {
            return Err(LanternError::not_found(format!(
                "no documents of type '{schema_type}'"
            )));
        }
        self.log.append(&LogRecord::DeleteType {
            schema_type: schema_type.to_string(),
        })?;
        self.tombstone(&doomed);
        Ok(doomed.len() as u64)
    }

    /// Tombstone an explicit set of documents, logging individual deletes.
    ///
    /// Used by delete-by-query, where the matching set is computed upstream.
    pub fn delete_documents(&mut self, doc_ids: &[DocumentId]) -> Result<u64> {
        let mut deleted = 0;
        for &doc_id in doc_ids {
            if !self.is_alive(doc_id) {
                continue;
            }
            let entry = &self.entries[doc_id as usize];
            let namespace = self.namespaces[entry.namespace_id as usize].clone();
            let uri = entry.uri.clone();
            self.delete(&namespace, &uri)?;
            deleted += 1;
        }
        if deleted == 0 {
            return Err(LanternError::not_found("no documents matched"));
        }
        Ok(deleted)
    }

    fn observable_ids<F: Fn(&DocumentEntry) -> bool>(&self, filter: F) -> Vec<DocumentId> {
        let now_ms = self.clock.now_ms();
        self.entries
            .iter()
            .enumerate()
            .filter(|&(_, entry)| !entry.deleted && !entry.is_expired_at(now_ms) && filter(entry))
            .map(|(id, _)| id as DocumentId)
            .collect()
    }

    fn tombstone(&mut self, doc_ids: &[DocumentId]) {
        for &doc_id in doc_ids {
            let entry = &mut self.entries[doc_id as usize];
            entry.deleted = true;
            let key = (entry.namespace_id, entry.uri.clone());
            self.key_mapper.remove(&key);
        }
    }

    /// Record a usage event for an observable document.
    pub fn report_usage(&mut self, report: &UsageReport) -> Result<()> {
        if self.lookup_alive(&report.namespace, &report.uri).is_none() {
            return Err(LanternError::not_found(format!(
                "document ({}, {}) not found",
                report.namespace, report.uri
            )));
        }
        self.usage.report(report)
    }

    /// Usage scores for a document-id, defaulting to zero.
    pub fn usage_for(&self, doc_id: DocumentId) -> UsageScores {
        let Some(entry) = self.entries.get(doc_id as usize) else {
            return UsageScores::default();
        };
        let namespace = &self.namespaces[entry.namespace_id as usize];
        self.usage.get(namespace, &entry.uri)
    }

    /// Namespaces that currently have at least one observable document.
    pub fn get_all_namespaces(&self) -> Vec<String> {
        let now_ms = self.clock.now_ms();
        let mut seen = vec![false; self.namespaces.len()];
        for entry in &self.entries {
            if !entry.deleted && !entry.is_expired_at(now_ms) {
                seen[entry.namespace_id as usize] = true;
            }
        }
        self.namespaces
            .iter()
            .zip(seen)
            .filter(|(_, s)| *s)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The largest assigned document-id, if any document was ever inserted.
    pub fn last_added_document_id(&self) -> Option<DocumentId> {
        (!self.entries.is_empty()).then(|| (self.entries.len() - 1) as DocumentId)
    }

    /// Total number of document slots, tombstoned included.
    pub fn num_documents(&self) -> usize {
        self.entries.len()
    }

    /// Current log size in bytes.
    pub fn document_log_size(&self) -> u64 {
        self.log.size()
    }

    /// What compaction would reclaim right now.
    pub fn get_optimize_info(&self) -> OptimizeInfo {
        let now_ms = self.clock.now_ms();
        let mut info = OptimizeInfo::default();
        for entry in &self.entries {
            if entry.deleted || entry.is_expired_at(now_ms) {
                info.optimizable_docs += 1;
                info.estimated_optimizable_bytes += entry.record_len as u64;
            }
        }
        info
    }

    /// Checksum over the log content.
    pub fn compute_checksum(&self) -> u32 {
        self.log.checksum()
    }

    /// Write a compacted copy of this store under `target_dir`.
    ///
    /// Only observable documents are copied, renumbered densely in retention
    /// order. Returns the new store together with the old-id → new-id map.
    /// The caller owns the directory swap that publishes the result.
    pub fn optimize_into(
        &self,
        target_dir: &str,
    ) -> Result<(DocumentStore, Vec<Option<DocumentId>>)> {
        self.storage.delete_dir(target_dir)?;

        let log_path = format!("{target_dir}/{LOG_FILE}");
        let (log, _, _) = DocumentLog::open(Arc::clone(&self.storage), &log_path)?;
        let mut compacted = DocumentStore {
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            dir: target_dir.to_string(),
            log,
            namespaces: Vec::new(),
            namespace_ids: AHashMap::new(),
            key_mapper: AHashMap::new(),
            entries: Vec::new(),
            usage: UsageStore::new(),
        };

        let mut id_map = vec![None; self.entries.len()];
        for doc_id in 0..self.entries.len() as DocumentId {
            if !self.is_alive(doc_id) {
                continue;
            }
            let document = self.get_document(doc_id)?;
            let record = LogRecord::Put {
                document: document.clone(),
            };
            let (offset, record_len) = compacted.log.append(&record)?;
            let new_id = compacted.apply_put(&document, offset, record_len);
            id_map[doc_id as usize] = Some(new_id);
        }

        // Usage survives compaction for identities that survived.
        for ((namespace, uri), scores) in self.usage.iter() {
            if compacted.lookup_any(namespace, uri).is_some() {
                compacted
                    .usage
                    .restore(namespace.clone(), uri.clone(), scores.clone());
            }
        }

        compacted.persist_to_disk()?;
        info!(
            "compacted document store: {} of {} documents retained",
            compacted.entries.len(),
            self.entries.len()
        );
        Ok((compacted, id_map))
    }

    /// Flush the log and persist the derived maps.
    pub fn persist_to_disk(&mut self) -> Result<()> {
        self.log.persist_to_disk()?;
        self.write_derived_maps()
    }

    fn write_derived_maps(&self) -> Result<()> {
        let output = self
            .storage
            .create_output(&format!("{}/{DERIVED_FILE}", self.dir))?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(DERIVED_MAGIC)?;
        writer.write_u64(self.log.size())?;
        writer.write_u32(self.log.checksum())?;

        writer.write_varint(self.namespaces.len() as u64)?;
        for namespace in &self.namespaces {
            writer.write_string(namespace)?;
        }

        writer.write_varint(self.entries.len() as u64)?;
        for entry in &self.entries {
            writer.write_u64(entry.log_offset)?;
            writer.write_u32(entry.record_len)?;
            writer.write_u8(entry.deleted as u8)?;
            writer.write_varint(entry.namespace_id as u64)?;
            writer.write_string(&entry.uri)?;
            writer.write_string(&entry.schema_type)?;
            writer.write_i64(entry.creation_time_ms)?;
            writer.write_i64(entry.ttl_ms)?;
            writer.write_i64(entry.score as i64)?;
        }

        writer.write_varint(self.usage.len() as u64)?;
        for ((namespace, uri), scores) in self.usage.iter() {
            writer.write_string(namespace)?;
            writer.write_string(uri)?;
            for count in scores.counts {
                writer.write_varint(count as u64)?;
            }
            for ts in scores.last_used_timestamp_ms {
                writer.write_i64(ts)?;
            }
        }

        writer.close()
    }

    /// Try to restore derived state; `Ok(false)` means the caller must
    /// replay the log instead.
    fn load_derived_maps(&mut self) -> Result<bool> {
        let path = format!("{}/{DERIVED_FILE}", self.dir);
        if !self.storage.file_exists(&path) {
            return Ok(false);
        }

        let input = self.storage.open_input(&path)?;
        let mut reader = StructReader::new(input)?;

        if reader.read_u32()? != DERIVED_MAGIC {
            return Ok(false);
        }
        // Stale derived maps (log advanced or rewound since the persist)
        // force a replay.
        if reader.read_u64()? != self.log.size() || reader.read_u32()? != self.log.checksum() {
            return Ok(false);
        }

        let namespace_count = reader.read_varint()? as usize;
        let mut namespaces = Vec::with_capacity(namespace_count);
        for _ in 0..namespace_count {
            namespaces.push(reader.read_string()?);
        }

        let entry_count = reader.read_varint()? as usize;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            entries.push(DocumentEntry {
                log_offset: reader.read_u64()?,
                record_len: reader.read_u32()?,
                deleted: reader.read_u8()? != 0,
                namespace_id: reader.read_varint()? as u32,
                uri: reader.read_string()?,
                schema_type: reader.read_string()?,
                creation_time_ms: reader.read_i64()?,
                ttl_ms: reader.read_i64()?,
                score: reader.read_i64()? as i32,
            });
        }

        let usage_count = reader.read_varint()? as usize;
        let mut usage = UsageStore::new();
        for _ in 0..usage_count {
            let namespace = reader.read_string()?;
            let uri = reader.read_string()?;
            let mut scores = UsageScores::default();
            for slot in 0..scores.counts.len() {
                scores.counts[slot] = reader.read_varint()? as i32;
            }
            for slot in 0..scores.last_used_timestamp_ms.len() {
                scores.last_used_timestamp_ms[slot] = reader.read_i64()?;
            }
            usage.restore(namespace, uri, scores);
        }

        if !reader.verify_checksum()? {
            return Ok(false);
        }

        self.namespace_ids = namespaces
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id as u32))
            .collect();
        self.namespaces = namespaces;
        self.key_mapper = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.deleted)
            .map(|(id, entry)| {
                (
                    (entry.namespace_id, entry.uri.clone()),
                    id as DocumentId,
                )
            })
            .collect();
        self.entries = entries;
        self.usage = usage;
        Ok(true)
    }
}
