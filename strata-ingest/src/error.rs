//! Ingestion error taxonomy.
//!
//! Three severities, escalating in scope:
//!
//! - [`IngestionError::TransientFetch`] — retried with backoff, may recover.
//! - [`IngestionError::PartitionFatal`] — one partition moves to `Error`,
//!   the rest of the task keeps ingesting.
//! - [`IngestionError::TaskFatal`] — the whole task stops and every owned
//!   partition is reported.
//!
//! Duplicate or stale records are not errors; they are dropped silently by
//! the dispatcher.

use strata_core::{Offset, PartitionKey, TopicName};
use thiserror::Error;

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Errors that can occur during ingestion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestionError {
    /// A transient log fetch/metadata failure that exhausted its retries
    /// is escalated by the task; before that it is retried internally.
    #[error("transient fetch failure after {attempts} attempts: {reason}")]
    TransientFetch {
        /// The affected partition, if the failure is partition-scoped.
        partition: Option<PartitionKey>,
        /// Attempts made before giving up.
        attempts: u32,
        /// Failure detail.
        reason: String,
    },

    /// An unrecoverable failure scoped to a single partition.
    #[error("partition {key} failed: {reason}")]
    PartitionFatal {
        /// The failed partition.
        key: PartitionKey,
        /// Failure detail.
        reason: String,
    },

    /// An unrecoverable failure that takes down the whole task.
    #[error("ingestion task for {topic} failed: {reason}")]
    TaskFatal {
        /// The topic whose task failed.
        topic: TopicName,
        /// Failure detail.
        reason: String,
    },

    /// A buffered checkpoint could not be persisted.
    #[error("checkpoint flush failed for {key} at offset {offset}: {reason}")]
    CheckpointFlush {
        /// The partition whose checkpoint failed.
        key: PartitionKey,
        /// The offset that could not be persisted.
        offset: Offset,
        /// Failure detail.
        reason: String,
    },
}

impl IngestionError {
    /// Returns the partition this error is scoped to, if any.
    #[must_use]
    pub const fn partition(&self) -> Option<&PartitionKey> {
        match self {
            Self::TransientFetch { partition, .. } => partition.as_ref(),
            Self::PartitionFatal { key, .. } | Self::CheckpointFlush { key, .. } => Some(key),
            Self::TaskFatal { .. } => None,
        }
    }
}
