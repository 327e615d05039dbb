//! Write batch errors.

use thiserror::Error;

/// Errors surfaced by [`super::WriteBatch`].
///
/// Any error returned from `commit` means the batch left no effects behind.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The connection handed to the batch cannot write.
    #[error("write batch requires a writable connection")]
    ReadOnlyConnection,
    /// A queue name is already registered under a different queue type.
    #[error("queue '{queue}' is already registered with a type other than '{queue_type}'")]
    QueueConflict { queue: String, queue_type: String },
    /// State data could not be serialized.
    #[error("failed to serialize state data: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Storage engine fault, passed through unchanged.
    #[error("sqlite error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl BatchError {
    /// True for the queue naming conflict, the one operator-facing error.
    pub fn is_queue_conflict(&self) -> bool {
        matches!(self, BatchError::QueueConflict { .. })
    }
}
