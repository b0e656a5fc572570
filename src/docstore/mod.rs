//! Document storage: the append-only log and its derived lookups.

pub mod log;
pub mod store;
pub mod usage;

pub use log::{DataStatus, DocumentLog, LogRecord};
pub use store::{
    DocStoreRecovery, DocumentEntry, DocumentId, DocumentStore, OptimizeInfo, MAX_DOCUMENT_ID,
    MAX_DOCUMENT_SIZE,
};
pub use usage::{UsageReport, UsageScores, UsageStore, UsageType, USAGE_TYPE_COUNT};
