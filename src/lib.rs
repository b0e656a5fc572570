//! # Lantern
//!
//! An embeddable, on-device full-text search engine.
//!
//! A client defines a schema of typed document classes with indexed string
//! properties, inserts documents conforming to it, and issues queries. The
//! engine keeps a two-tier inverted index (a small mutable lite tier, a
//! large immutable main tier), an append-only document log with derived
//! lookups, and a persisted schema store, all cross-validated by a header
//! checksum at startup so the engine recovers consistently from crashes.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use lantern::clock::SystemClock;
//! use lantern::document::Document;
//! use lantern::engine::{EngineOptions, SearchEngine};
//! use lantern::query::{ResultSpec, ScoringSpec, SearchSpec};
//! use lantern::schema::{
//!     Cardinality, PropertyConfig, Schema, SchemaType, StringIndexingConfig, TermMatchType,
//!     TokenizerKind,
//! };
//! use lantern::storage::MemoryStorage;
//!
//! let engine = SearchEngine::new(
//!     EngineOptions::default(),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(SystemClock::new()),
//! );
//! engine.initialize().unwrap();
//!
//! engine
//!     .set_schema(
//!         Schema::new(vec![SchemaType::new(
//!             "message",
//!             vec![PropertyConfig::string(
//!                 "body",
//!                 Cardinality::Optional,
//!                 StringIndexingConfig {
//!                     term_match_type: TermMatchType::Prefix,
//!                     tokenizer: TokenizerKind::Plain,
//!                 },
//!             )],
//!         )]),
//!         false,
//!     )
//!     .unwrap();
//!
//! engine
//!     .put(
//!         Document::builder("ns", "uri1", "message")
//!             .string_property("body", "message body")
//!             .build(),
//!     )
//!     .unwrap();
//!
//! let results = engine
//!     .search(
//!         SearchSpec {
//!             query: "message".to_string(),
//!             term_match_type: TermMatchType::Prefix,
//!             ..Default::default()
//!         },
//!         ScoringSpec::default(),
//!         ResultSpec::default(),
//!     )
//!     .unwrap();
//! assert_eq!(results.results.len(), 1);
//! ```

pub mod analysis;
pub mod clock;
pub mod docstore;
pub mod document;
pub mod engine;
pub mod error;
pub mod index;
pub mod query;
pub mod schema;
pub mod storage;
pub mod util;

pub use clock::{Clock, FakeClock, SystemClock};
pub use document::Document;
pub use engine::{EngineOptions, SearchEngine};
pub use error::{LanternError, Result};
pub use query::{ResultSpec, ScoringSpec, SearchResults, SearchSpec};
pub use schema::Schema;
pub use storage::{FileStorage, MemoryStorage, Storage};

/// Version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
