//! The persisted schema store.
//!
//! Holds the current schema, the derived type-id and section-id assignments,
//! and the compatibility rules deciding which schema mutations are accepted.

use std::io::Read;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::warn;

use crate::error::{LanternError, Result};
use crate::schema::section::{assign_sections, SectionMetadata};
use crate::schema::types::{DataType, Schema, SchemaType};
use crate::storage::{Storage, StructReader, StructWriter};

const SCHEMA_FILE: &str = "schema_dir/schema.pb";
const HEADER_FILE: &str = "schema_dir/schema_store_header";
const HEADER_MAGIC: u32 = 0x5C11E3A0;

/// Outcome of a `set_schema` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetSchemaResult {
    /// Whether every existing document remains valid under the new schema.
    pub is_compatible: bool,

    /// Whether the index must be restored (section assignment changed).
    pub index_incompatible: bool,

    /// Types whose documents are invalidated by the change. Deleted types
    /// appear here as well as in `deleted_schema_types`.
    pub incompatible_schema_types: Vec<String>,

    /// Types present in the old schema but absent from the new one.
    pub deleted_schema_types: Vec<String>,
}

/// The schema store: persisted schema plus derived assignments.
#[derive(Debug)]
pub struct SchemaStore {
    storage: Arc<dyn Storage>,
    schema: Option<Schema>,
    /// Serialized form of `schema`, kept for checksumming.
    serialized: Vec<u8>,
    /// Per-type section assignment, keyed by type name.
    sections: AHashMap<String, Vec<SectionMetadata>>,
}

impl SchemaStore {
    /// Open the schema store, restoring any persisted schema.
    ///
    /// Returns the store and whether recovery was needed (missing or stale
    /// header, or an unreadable schema blob).
    pub fn create(storage: Arc<dyn Storage>) -> Result<(Self, bool)> {
        let mut store = SchemaStore {
            storage,
            schema: None,
            serialized: Vec::new(),
            sections: AHashMap::new(),
        };

        if !store.storage.file_exists(SCHEMA_FILE) {
            // A dangling header without a schema blob is stale state.
            let recovered = store.storage.file_exists(HEADER_FILE);
            if recovered {
                store.storage.delete_file(HEADER_FILE)?;
            }
            return Ok((store, recovered));
        }

        let mut blob = Vec::new();
        store.storage.open_input(SCHEMA_FILE)?.read_to_end(&mut blob)?;

        let schema: Schema = match serde_json::from_slice(&blob) {
            Ok(schema) => schema,
            Err(e) => {
                warn!("schema blob unreadable, resetting schema store: {e}");
                store.storage.delete_file(SCHEMA_FILE)?;
                store.storage.delete_file(HEADER_FILE)?;
                return Ok((store, true));
            }
        };

        let recovered = !store.header_matches(&blob);
        store.install(schema, blob)?;
        if recovered {
            store.write_header()?;
        }
        Ok((store, recovered))
    }

    fn header_matches(&self, blob: &[u8]) -> bool {
        let Ok(input) = self.storage.open_input(HEADER_FILE) else {
            return false;
        };
        let Ok(mut reader) = StructReader::new(input) else {
            return false;
        };
        let magic = reader.read_u32().unwrap_or(0);
        let checksum = reader.read_u32().unwrap_or(0);
        let intact = reader.verify_checksum().unwrap_or(false);
        intact && magic == HEADER_MAGIC && checksum == crc32fast::hash(blob)
    }

    fn write_header(&self) -> Result<()> {
        let output = self.storage.create_output(HEADER_FILE)?;
        let mut writer = StructWriter::new(output);
        writer.write_u32(HEADER_MAGIC)?;
        writer.write_u32(crc32fast::hash(&self.serialized))?;
        writer.close()
    }

    /// Swap in a validated schema and recompute derived assignments.
    fn install(&mut self, schema: Schema, serialized: Vec<u8>) -> Result<()> {
        let mut sections = AHashMap::new();
        for schema_type in &schema.types {
            sections.insert(schema_type.name.clone(), assign_sections(schema_type)?);
        }
        self.schema = Some(schema);
        self.serialized = serialized;
        self.sections = sections;
        Ok(())
    }

    /// Set or replace the schema.
    ///
    /// Structural problems fail with `InvalidArgument`/`AlreadyExists`. An
    /// incompatible change fails with `FailedPrecondition` unless
    /// `ignore_errors_and_delete_documents` is set, in which case it is
    /// applied and the returned result names the types whose documents the
    /// caller must delete.
    pub fn set_schema(
        &mut self,
        new_schema: Schema,
        ignore_errors_and_delete_documents: bool,
    ) -> Result<SetSchemaResult> {
        new_schema.validate()?;

        // Section assignment must succeed for every type before anything is
        // persisted.
        let mut new_sections = AHashMap::new();
        for schema_type in &new_schema.types {
            new_sections.insert(schema_type.name.clone(), assign_sections(schema_type)?);
        }

        let result = match &self.schema {
            Some(old) => diff_schemas(old, &new_schema, &self.sections, &new_sections),
            None => SetSchemaResult {
                is_compatible: true,
                // First schema ever: nothing indexed yet, nothing to restore.
                index_incompatible: false,
                ..Default::default()
            },
        };

        if !result.is_compatible && !ignore_errors_and_delete_documents {
            return Err(LanternError::failed_precondition(format!(
                "incompatible schema change; incompatible types: [{}], deleted types: [{}]",
                result.incompatible_schema_types.join(", "),
                result.deleted_schema_types.join(", ")
            )));
        }

        let serialized = serde_json::to_vec(&new_schema)?;
        let mut output = self.storage.create_output(SCHEMA_FILE)?;
        std::io::Write::write_all(&mut output, &serialized)?;
        output.flush_and_sync()?;

        self.schema = Some(new_schema);
        self.serialized = serialized;
        self.sections = new_sections;
        self.write_header()?;

        Ok(result)
    }

    /// Get the current schema.
    pub fn get_schema(&self) -> Result<&Schema> {
        self.schema
            .as_ref()
            .ok_or_else(|| LanternError::not_found("no schema has been set"))
    }

    /// Whether a schema has been set.
    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    /// Get one schema type by name.
    pub fn get_schema_type(&self, name: &str) -> Result<&SchemaType> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| LanternError::failed_precondition("no schema has been set"))?;
        schema
            .get_type(name)
            .ok_or_else(|| LanternError::not_found(format!("unknown schema type '{name}'")))
    }

    /// The sections of a type, in section-id order.
    pub fn sections_of(&self, type_name: &str) -> Result<&[SectionMetadata]> {
        self.sections
            .get(type_name)
            .map(|s| s.as_slice())
            .ok_or_else(|| LanternError::not_found(format!("unknown schema type '{type_name}'")))
    }

    /// The dense type-id of a type in schema order.
    pub fn type_id(&self, type_name: &str) -> Result<u32> {
        let schema = self
            .schema
            .as_ref()
            .ok_or_else(|| LanternError::failed_precondition("no schema has been set"))?;
        schema
            .type_id(type_name)
            .ok_or_else(|| LanternError::not_found(format!("unknown schema type '{type_name}'")))
    }

    /// Checksum over the persisted schema; zero when no schema is set.
    pub fn compute_checksum(&self) -> u32 {
        if self.serialized.is_empty() {
            0
        } else {
            crc32fast::hash(&self.serialized)
        }
    }

    /// Rewrite the derived header. The schema blob itself is already durable
    /// after every successful `set_schema`.
    pub fn persist_to_disk(&self) -> Result<()> {
        if self.schema.is_some() {
            self.write_header()?;
        }
        Ok(())
    }
}

/// Compute the compatibility diff between two schemas.
fn diff_schemas(
    old: &Schema,
    new: &Schema,
    old_sections: &AHashMap<String, Vec<SectionMetadata>>,
    new_sections: &AHashMap<String, Vec<SectionMetadata>>,
) -> SetSchemaResult {
    let mut result = SetSchemaResult {
        is_compatible: true,
        ..Default::default()
    };

    for old_type in &old.types {
        let Some(new_type) = new.get_type(&old_type.name) else {
            result.deleted_schema_types.push(old_type.name.clone());
            result.incompatible_schema_types.push(old_type.name.clone());
            // Deleting a type also deletes its posting lists.
            result.index_incompatible = true;
            continue;
        };

        if !type_is_compatible(old_type, new_type) {
            result.incompatible_schema_types.push(new_type.name.clone());
        }

        if old_sections.get(&old_type.name) != new_sections.get(&new_type.name) {
            result.index_incompatible = true;
        }
    }

    result.is_compatible = result.incompatible_schema_types.is_empty();
    result
}

/// Whether every document valid under `old` is still valid under `new`.
fn type_is_compatible(old: &SchemaType, new: &SchemaType) -> bool {
    for old_prop in &old.properties {
        let Some(new_prop) = new.property(&old_prop.name) else {
            return false;
        };
        if new_prop.data_type != old_prop.data_type {
            return false;
        }
        if old_prop.data_type == DataType::Document
            && new_prop.document_type != old_prop.document_type
        {
            return false;
        }
        if !old_prop
            .cardinality
            .is_compatible_change_to(new_prop.cardinality)
        {
            return false;
        }
    }

    // A newly added required property invalidates every existing document.
    for new_prop in &new.properties {
        if old.property(&new_prop.name).is_none()
            && new_prop.cardinality == crate::schema::types::Cardinality::Required
        {
            return false;
        }
    }

    true
}
