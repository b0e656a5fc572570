//! Stats records reported by engine lifecycle operations.

use crate::docstore::DataStatus;

/// Why a subsystem needed recovery during `initialize`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryCause {
    /// No recovery was needed.
    #[default]
    None,
    /// Persisted data was corrupt or truncated.
    DataLoss,
    /// The subsystem disagreed with the document log.
    InconsistentWithGroundTruth,
    /// The header checksum did not cover the current subsystem state.
    TotalChecksumMismatch,
    /// Derived files were missing or unreadable.
    IoError,
}

/// What `initialize` had to repair, and how bad the damage was.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InitializeStats {
    /// Why the schema store recovered.
    pub schema_store_recovery_cause: RecoveryCause,
    /// Why the document store recovered.
    pub document_store_recovery_cause: RecoveryCause,
    /// Why the index was restored.
    pub index_restoration_cause: RecoveryCause,
    /// How much of the document log survived.
    pub document_store_data_status: DataStatus,
}

/// Outcome of a successful `optimize`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    /// Documents before compaction, tombstoned and expired included.
    pub num_original_documents: u64,
    /// Documents surviving compaction.
    pub num_retained_documents: u64,
    /// Document log size before compaction.
    pub log_size_before: u64,
    /// Document log size after compaction.
    pub log_size_after: u64,
}
