//! Section-id assignment.
//!
//! A section is one indexed string property of one type. Section ids are
//! dense small integers assigned in stable property-name order, so the index
//! can pack a hit's section into a few bits and queries can filter whole
//! properties with a bitmask.

use serde::{Deserialize, Serialize};

use crate::error::{LanternError, Result};
use crate::schema::types::{SchemaType, StringIndexingConfig};

/// Identifier of one indexed string property within a type.
pub type SectionId = u8;

/// Bitmask over section ids; bit `n` selects section `n`.
pub type SectionIdMask = u16;

/// The maximum number of indexed string properties per type.
pub const MAX_SECTIONS_PER_TYPE: usize = 16;

/// Mask selecting every section.
pub const SECTION_ID_MASK_ALL: SectionIdMask = u16::MAX;

/// Mask selecting no section.
pub const SECTION_ID_MASK_NONE: SectionIdMask = 0;

/// Metadata for one section of a type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMetadata {
    /// The dense section id within the type.
    pub id: SectionId,

    /// Name of the property this section indexes.
    pub property_name: String,

    /// The property's indexing configuration.
    pub indexing: StringIndexingConfig,
}

/// Compute the section assignment for a type.
///
/// Indexed string properties are sorted by name and numbered from zero. A
/// type declaring more than [`MAX_SECTIONS_PER_TYPE`] indexed properties is
/// rejected.
pub fn assign_sections(schema_type: &SchemaType) -> Result<Vec<SectionMetadata>> {
    let mut indexed: Vec<&_> = schema_type
        .properties
        .iter()
        .filter(|p| p.is_indexed_string())
        .collect();
    indexed.sort_by(|a, b| a.name.cmp(&b.name));

    if indexed.len() > MAX_SECTIONS_PER_TYPE {
        return Err(LanternError::out_of_space(format!(
            "type '{}' declares {} indexed properties; the maximum is {}",
            schema_type.name,
            indexed.len(),
            MAX_SECTIONS_PER_TYPE
        )));
    }

    Ok(indexed
        .into_iter()
        .enumerate()
        .map(|(id, property)| SectionMetadata {
            id: id as SectionId,
            property_name: property.name.clone(),
            indexing: property.string_indexing.unwrap_or_default(),
        })
        .collect())
}
