//! Schema data model: typed document classes and their property configs.

use serde::{Deserialize, Serialize};

use crate::error::{LanternError, Result};

/// The data type of a property value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// UTF-8 string, optionally indexed for search.
    String,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Double,
    /// Boolean.
    Boolean,
    /// Opaque bytes.
    Bytes,
    /// A nested document of a referenced schema type.
    Document,
}

/// How many values a property may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// Exactly one value must be present.
    Required,
    /// Zero or one value.
    Optional,
    /// Zero or more values.
    Repeated,
}

impl Cardinality {
    /// Whether a document valid under `self` is also valid under `new`.
    ///
    /// Loosening (`Required` → `Optional` → `Repeated`) is fine; any
    /// tightening invalidates previously accepted documents.
    pub fn is_compatible_change_to(self, new: Cardinality) -> bool {
        match (self, new) {
            (Cardinality::Required, _) => true,
            (Cardinality::Optional, Cardinality::Optional | Cardinality::Repeated) => true,
            (Cardinality::Repeated, Cardinality::Repeated) => true,
            _ => false,
        }
    }
}

/// How a term in an indexed string property matches query terms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermMatchType {
    /// Property is not indexed.
    #[default]
    Unknown,
    /// Terms match only whole query terms.
    ExactOnly,
    /// Terms match query terms that are a prefix of them.
    Prefix,
}

/// The tokenizer used when indexing a string property.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenizerKind {
    /// No tokenization; the property is not indexed.
    #[default]
    None,
    /// Unicode word-boundary segmentation with lowercasing.
    Plain,
    /// The whole value as a single token.
    Verbatim,
}

/// Indexing configuration for a `String` property.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringIndexingConfig {
    /// How indexed terms match query terms.
    pub term_match_type: TermMatchType,
    /// Which tokenizer segments the value.
    pub tokenizer: TokenizerKind,
}

impl StringIndexingConfig {
    /// Whether this config actually puts terms into the index.
    pub fn is_indexed(&self) -> bool {
        self.term_match_type != TermMatchType::Unknown && self.tokenizer != TokenizerKind::None
    }
}

/// Configuration for one property of a schema type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    /// Property name, unique within the type.
    pub name: String,

    /// The property's data type.
    pub data_type: DataType,

    /// How many values the property carries.
    pub cardinality: Cardinality,

    /// Indexing config; only meaningful for `String` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_indexing: Option<StringIndexingConfig>,

    /// Referenced type name; only meaningful for `Document` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,

    /// Whether nested documents under this property participate in cycle
    /// checks as indexed references.
    #[serde(default)]
    pub index_nested_properties: bool,
}

impl PropertyConfig {
    /// Create a string property with the given indexing config.
    pub fn string<S: Into<String>>(
        name: S,
        cardinality: Cardinality,
        indexing: StringIndexingConfig,
    ) -> Self {
        PropertyConfig {
            name: name.into(),
            data_type: DataType::String,
            cardinality,
            string_indexing: Some(indexing),
            document_type: None,
            index_nested_properties: false,
        }
    }

    /// Create an unindexed property of the given scalar type.
    pub fn scalar<S: Into<String>>(name: S, data_type: DataType, cardinality: Cardinality) -> Self {
        PropertyConfig {
            name: name.into(),
            data_type,
            cardinality,
            string_indexing: None,
            document_type: None,
            index_nested_properties: false,
        }
    }

    /// Create a nested-document property referencing another type.
    pub fn document<S: Into<String>, T: Into<String>>(
        name: S,
        referenced_type: T,
        cardinality: Cardinality,
        index_nested_properties: bool,
    ) -> Self {
        PropertyConfig {
            name: name.into(),
            data_type: DataType::Document,
            cardinality,
            string_indexing: None,
            document_type: Some(referenced_type.into()),
            index_nested_properties,
        }
    }

    /// Whether this property contributes a section to the index.
    pub fn is_indexed_string(&self) -> bool {
        self.data_type == DataType::String
            && self.string_indexing.map(|c| c.is_indexed()).unwrap_or(false)
    }
}

/// One typed document class: a name plus an ordered list of properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaType {
    /// The type name, unique within the schema.
    pub name: String,

    /// Property configs in declaration order.
    pub properties: Vec<PropertyConfig>,
}

impl SchemaType {
    /// Create a new schema type.
    pub fn new<S: Into<String>>(name: S, properties: Vec<PropertyConfig>) -> Self {
        SchemaType {
            name: name.into(),
            properties,
        }
    }

    /// Look up a property config by name.
    pub fn property(&self, name: &str) -> Option<&PropertyConfig> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A full schema: an ordered collection of schema types.
///
/// Type order is significant: the dense type-id assignment follows it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Schema types in declaration order.
    pub types: Vec<SchemaType>,
}

impl Schema {
    /// Create a schema from a list of types.
    pub fn new(types: Vec<SchemaType>) -> Self {
        Schema { types }
    }

    /// Look up a type by name.
    pub fn get_type(&self, name: &str) -> Option<&SchemaType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// The dense type-id of the named type (its position in schema order).
    pub fn type_id(&self, name: &str) -> Option<u32> {
        self.types.iter().position(|t| t.name == name).map(|i| i as u32)
    }

    /// Validate structural invariants.
    ///
    /// Checks: non-empty unique type names, non-empty unique property names
    /// within each type, document references resolve, and the transitive
    /// `Document` reference graph restricted to `index_nested_properties`
    /// edges is acyclic.
    pub fn validate(&self) -> Result<()> {
        let mut seen_types = std::collections::HashSet::new();
        for schema_type in &self.types {
            if schema_type.name.is_empty() {
                return Err(LanternError::invalid_argument("schema type name is empty"));
            }
            if !seen_types.insert(schema_type.name.as_str()) {
                return Err(LanternError::already_exists(format!(
                    "duplicate schema type '{}'",
                    schema_type.name
                )));
            }

            let mut seen_props = std::collections::HashSet::new();
            for property in &schema_type.properties {
                if property.name.is_empty() {
                    return Err(LanternError::invalid_argument(format!(
                        "empty property name in type '{}'",
                        schema_type.name
                    )));
                }
                if !seen_props.insert(property.name.as_str()) {
                    return Err(LanternError::already_exists(format!(
                        "duplicate property '{}' in type '{}'",
                        property.name, schema_type.name
                    )));
                }

                match property.data_type {
                    DataType::Document => {
                        let referenced = property.document_type.as_deref().unwrap_or("");
                        if referenced.is_empty() {
                            return Err(LanternError::invalid_argument(format!(
                                "document property '{}.{}' has no referenced type",
                                schema_type.name, property.name
                            )));
                        }
                        if self.get_type(referenced).is_none() {
                            return Err(LanternError::invalid_argument(format!(
                                "document property '{}.{}' references unknown type '{referenced}'",
                                schema_type.name, property.name
                            )));
                        }
                    }
                    _ => {
                        if property.document_type.is_some() {
                            return Err(LanternError::invalid_argument(format!(
                                "non-document property '{}.{}' references a type",
                                schema_type.name, property.name
                            )));
                        }
                    }
                }
            }
        }

        self.check_reference_cycles()
    }

    /// DFS over indexed `Document` reference edges looking for a cycle.
    fn check_reference_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(schema: &Schema, index: usize, marks: &mut [Mark]) -> Result<()> {
            marks[index] = Mark::InProgress;
            let schema_type = &schema.types[index];
            for property in &schema_type.properties {
                if property.data_type != DataType::Document || !property.index_nested_properties {
                    continue;
                }
                let referenced = property.document_type.as_deref().unwrap_or("");
                let Some(target) = schema.types.iter().position(|t| t.name == referenced) else {
                    continue;
                };
                match marks[target] {
                    Mark::InProgress => {
                        return Err(LanternError::invalid_argument(format!(
                            "cyclic document reference through type '{}'",
                            schema.types[target].name
                        )));
                    }
                    Mark::Unvisited => visit(schema, target, marks)?,
                    Mark::Done => {}
                }
            }
            marks[index] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.types.len()];
        for index in 0..self.types.len() {
            if marks[index] == Mark::Unvisited {
                visit(self, index, &mut marks)?;
            }
        }
        Ok(())
    }
}
