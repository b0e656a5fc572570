//! Property values.

use serde::{Deserialize, Serialize};

use crate::document::document::Document;
use crate::schema::DataType;

/// A single value of a document property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// UTF-8 string.
    String(String),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Boolean(bool),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// A nested document.
    Document(Document),
}

impl PropertyValue {
    /// The schema data type this value corresponds to.
    pub fn data_type(&self) -> DataType {
        match self {
            PropertyValue::String(_) => DataType::String,
            PropertyValue::Int64(_) => DataType::Int64,
            PropertyValue::Double(_) => DataType::Double,
            PropertyValue::Boolean(_) => DataType::Boolean,
            PropertyValue::Bytes(_) => DataType::Bytes,
            PropertyValue::Document(_) => DataType::Document,
        }
    }

    /// The string content, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}
