//! Error types for checkpoint persistence
//!
//! All errors that a checkpoint backend can surface. Backends wrap their
//! transport/storage failures in [`CheckpointError::Storage`]; structural
//! problems found while decoding stored data use [`CheckpointError::Invalid`].

use thiserror::Error;

/// Convenience result type using [`CheckpointError`]
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors surfaced by checkpoint stores and serializers
///
/// # Examples
///
/// ```rust
/// use hive_checkpoint::error::CheckpointError;
///
/// let err = CheckpointError::Storage("connection refused".to_string());
/// assert_eq!(format!("{}", err), "Checkpoint storage error: connection refused");
/// ```
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The backing store failed to save or load
    ///
    /// A `save` that returns this error has not durably persisted the
    /// checkpoint; callers must treat the commit as aborted.
    #[error("Checkpoint storage error: {0}")]
    Storage(String),

    /// Stored data is structurally invalid
    #[error("Invalid checkpoint data: {0}")]
    Invalid(String),

    /// JSON serialization/deserialization failed
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization/deserialization failed
    #[error("Checkpoint binary encoding error: {0}")]
    Binary(#[from] bincode::Error),
}
