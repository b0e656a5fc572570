//! Error types for the Lantern library.
//!
//! Every fallible operation in Lantern returns [`Result`], and every error is
//! a [`LanternError`] variant corresponding to one of the engine's result
//! codes. Internal layers propagate the variant unchanged; the outermost
//! layer attaches the user-visible message.

use std::io;

use thiserror::Error;

/// The main error type for Lantern operations.
///
/// Variants map one-to-one onto the engine's result codes, so callers can
/// match on the class of failure without parsing messages.
#[derive(Error, Debug)]
pub enum LanternError {
    /// I/O errors from the storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed input: bad options, empty namespace/uri, invalid schema
    /// structure, negative page size.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation is not valid in the current state, e.g. a call before
    /// `initialize` or an incompatible schema change without force.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The requested document, schema type, or other entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate type or property name within a single schema.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A capacity limit was hit: document too large, document-id space or
    /// lexicon exhausted.
    #[error("Out of space: {0}")]
    OutOfSpace(String),

    /// The operation bailed out before mutating anything.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// Unrecoverable internal failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Persisted data was lost or truncated and could not be fully restored.
    #[error("Data loss: {0}")]
    DataLoss(String),

    /// Serialization/deserialization failure for persisted blobs.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for operations that may fail with [`LanternError`].
pub type Result<T> = std::result::Result<T, LanternError>;

impl LanternError {
    /// Create a new invalid-argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        LanternError::InvalidArgument(msg.into())
    }

    /// Create a new failed-precondition error.
    pub fn failed_precondition<S: Into<String>>(msg: S) -> Self {
        LanternError::FailedPrecondition(msg.into())
    }

    /// Create a new not-found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        LanternError::NotFound(msg.into())
    }

    /// Create a new already-exists error.
    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        LanternError::AlreadyExists(msg.into())
    }

    /// Create a new out-of-space error.
    pub fn out_of_space<S: Into<String>>(msg: S) -> Self {
        LanternError::OutOfSpace(msg.into())
    }

    /// Create a new aborted error.
    pub fn aborted<S: Into<String>>(msg: S) -> Self {
        LanternError::Aborted(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        LanternError::Internal(msg.into())
    }

    /// Create a new data-loss error.
    pub fn data_loss<S: Into<String>>(msg: S) -> Self {
        LanternError::DataLoss(msg.into())
    }

    /// Check whether this error is the not-found variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LanternError::NotFound(_))
    }
}
