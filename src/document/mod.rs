//! Document model: structured documents conforming to a schema.

pub mod document;
pub mod value;

pub use document::{Document, DocumentBuilder, Property};
pub use value::PropertyValue;
