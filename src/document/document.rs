//! The document type and schema validation.

use serde::{Deserialize, Serialize};

use crate::document::value::PropertyValue;
use crate::error::{LanternError, Result};
use crate::schema::{Cardinality, DataType, SchemaStore};

/// One named property of a document with its values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Property name, matching a property config of the document's type.
    pub name: String,

    /// The property's values; a single-valued property carries one entry.
    pub values: Vec<PropertyValue>,
}

/// A structured document.
///
/// Identity is `(namespace, uri)`: putting a document with an existing
/// identity replaces the prior version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Grouping key for ownership and filtering.
    pub namespace: String,

    /// Identifier unique within the namespace.
    pub uri: String,

    /// Name of the schema type this document conforms to.
    pub schema_type: String,

    /// Creation timestamp in milliseconds since the epoch. Zero means
    /// "assign at insertion time".
    pub creation_time_ms: i64,

    /// Time-to-live in milliseconds from `creation_time_ms`; zero means the
    /// document never expires.
    pub ttl_ms: i64,

    /// Client-assigned score usable for ranking.
    pub score: i32,

    /// The document's properties.
    pub properties: Vec<Property>,
}

impl Document {
    /// Start building a document.
    pub fn builder<N: Into<String>, U: Into<String>, T: Into<String>>(
        namespace: N,
        uri: U,
        schema_type: T,
    ) -> DocumentBuilder {
        DocumentBuilder {
            document: Document {
                namespace: namespace.into(),
                uri: uri.into(),
                schema_type: schema_type.into(),
                creation_time_ms: 0,
                ttl_ms: 0,
                score: 0,
                properties: Vec::new(),
            },
        }
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// All string values of the named property.
    pub fn string_values(&self, name: &str) -> Vec<&str> {
        self.property(name)
            .map(|p| p.values.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }

    /// Whether the document is expired at the given time.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.ttl_ms > 0 && now_ms >= self.creation_time_ms.saturating_add(self.ttl_ms)
    }

    /// Validate this document against the current schema.
    ///
    /// Checks identity fields, type existence, property declarations, value
    /// types, and cardinality. Nested documents are validated against their
    /// referenced type.
    pub fn validate(&self, schema_store: &SchemaStore) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(LanternError::invalid_argument("document namespace is empty"));
        }
        if self.uri.is_empty() {
            return Err(LanternError::invalid_argument("document uri is empty"));
        }
        if self.schema_type.is_empty() {
            return Err(LanternError::invalid_argument("document type is empty"));
        }
        self.validate_body(schema_store)
    }

    /// Validate everything but the identity fields (nested documents have no
    /// identity of their own).
    fn validate_body(&self, schema_store: &SchemaStore) -> Result<()> {
        let schema_type = schema_store.get_schema_type(&self.schema_type)?;

        for property in &self.properties {
            let Some(config) = schema_type.property(&property.name) else {
                return Err(LanternError::invalid_argument(format!(
                    "property '{}' is not declared by type '{}'",
                    property.name, self.schema_type
                )));
            };

            match config.cardinality {
                Cardinality::Required | Cardinality::Optional => {
                    if property.values.len() > 1 {
                        return Err(LanternError::invalid_argument(format!(
                            "property '{}' of type '{}' is single-valued but has {} values",
                            property.name,
                            self.schema_type,
                            property.values.len()
                        )));
                    }
                }
                Cardinality::Repeated => {}
            }

            for value in &property.values {
                if value.data_type() != config.data_type {
                    return Err(LanternError::invalid_argument(format!(
                        "property '{}' of type '{}' expects {:?}, got {:?}",
                        property.name,
                        self.schema_type,
                        config.data_type,
                        value.data_type()
                    )));
                }
                if let PropertyValue::Document(nested) = value {
                    let expected = config.document_type.as_deref().unwrap_or("");
                    if nested.schema_type != expected {
                        return Err(LanternError::invalid_argument(format!(
                            "nested document under '{}' must be of type '{expected}', got '{}'",
                            property.name, nested.schema_type
                        )));
                    }
                    nested.validate_body(schema_store)?;
                }
            }
        }

        for config in &schema_type.properties {
            if config.cardinality == Cardinality::Required {
                let present = self
                    .property(&config.name)
                    .map(|p| !p.values.is_empty())
                    .unwrap_or(false);
                if !present {
                    return Err(LanternError::invalid_argument(format!(
                        "required property '{}' of type '{}' is missing",
                        config.name, self.schema_type
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Builder for [`Document`].
#[derive(Debug)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    /// Set the creation timestamp.
    pub fn creation_time_ms(mut self, creation_time_ms: i64) -> Self {
        self.document.creation_time_ms = creation_time_ms;
        self
    }

    /// Set the time-to-live.
    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.document.ttl_ms = ttl_ms;
        self
    }

    /// Set the document score.
    pub fn score(mut self, score: i32) -> Self {
        self.document.score = score;
        self
    }

    /// Add a single string property value.
    pub fn string_property<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.document.properties.push(Property {
            name: name.into(),
            values: vec![PropertyValue::String(value.into())],
        });
        self
    }

    /// Add a property with explicit values.
    pub fn property<N: Into<String>>(mut self, name: N, values: Vec<PropertyValue>) -> Self {
        self.document.properties.push(Property {
            name: name.into(),
            values,
        });
        self
    }

    /// Finish building.
    pub fn build(self) -> Document {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        PropertyConfig, Schema, SchemaType, StringIndexingConfig, TermMatchType, TokenizerKind,
    };
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn store_with_schema() -> SchemaStore {
        let storage: Arc<dyn crate::storage::Storage> = Arc::new(MemoryStorage::new());
        let (mut store, _) = SchemaStore::create(storage).unwrap();
        store
            .set_schema(
                Schema::new(vec![SchemaType::new(
                    "email",
                    vec![
                        PropertyConfig::string(
                            "subject",
                            Cardinality::Required,
                            StringIndexingConfig {
                                term_match_type: TermMatchType::Prefix,
                                tokenizer: TokenizerKind::Plain,
                            },
                        ),
                        PropertyConfig::string(
                            "body",
                            Cardinality::Optional,
                            StringIndexingConfig::default(),
                        ),
                        PropertyConfig::scalar("read", DataType::Boolean, Cardinality::Optional),
                    ],
                )]),
                false,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_builder_and_accessors() {
        let document = Document::builder("ns", "uri1", "email")
            .creation_time_ms(100)
            .ttl_ms(500)
            .score(7)
            .string_property("subject", "hello world")
            .build();

        assert_eq!(document.string_values("subject"), vec!["hello world"]);
        assert!(document.string_values("body").is_empty());
        assert!(!document.is_expired_at(599));
        assert!(document.is_expired_at(600));
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let document = Document::builder("ns", "uri1", "email")
            .creation_time_ms(100)
            .build();
        assert!(!document.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_validate_ok() {
        let store = store_with_schema();
        let document = Document::builder("ns", "uri1", "email")
            .string_property("subject", "hi")
            .property("read", vec![PropertyValue::Boolean(true)])
            .build();
        document.validate(&store).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_identity() {
        let store = store_with_schema();
        let document = Document::builder("", "uri1", "email")
            .string_property("subject", "hi")
            .build();
        assert!(matches!(
            document.validate(&store),
            Err(LanternError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_type() {
        let store = store_with_schema();
        let document = Document::builder("ns", "uri1", "memo")
            .string_property("subject", "hi")
            .build();
        assert!(document.validate(&store).unwrap_err().is_not_found());
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let store = store_with_schema();
        let document = Document::builder("ns", "uri1", "email").build();
        assert!(matches!(
            document.validate(&store),
            Err(LanternError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_undeclared_property() {
        let store = store_with_schema();
        let document = Document::builder("ns", "uri1", "email")
            .string_property("subject", "hi")
            .string_property("attachment", "x")
            .build();
        assert!(matches!(
            document.validate(&store),
            Err(LanternError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_wrong_value_type() {
        let store = store_with_schema();
        let document = Document::builder("ns", "uri1", "email")
            .string_property("subject", "hi")
            .property("read", vec![PropertyValue::Int64(1)])
            .build();
        assert!(matches!(
            document.validate(&store),
            Err(LanternError::InvalidArgument(_))
        ));
    }
}
