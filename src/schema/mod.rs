//! Schema definition, section assignment, and the persisted schema store.

pub mod section;
pub mod store;
pub mod types;

pub use section::{SectionId, SectionIdMask, SectionMetadata, MAX_SECTIONS_PER_TYPE, SECTION_ID_MASK_ALL, SECTION_ID_MASK_NONE};
pub use store::{SchemaStore, SetSchemaResult};
pub use types::{
    Cardinality, DataType, PropertyConfig, Schema, SchemaType, StringIndexingConfig,
    TermMatchType, TokenizerKind,
};
