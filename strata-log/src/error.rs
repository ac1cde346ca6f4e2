//! Replication log error types.

use strata_core::{Offset, PartitionKey};
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur while talking to the replication log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// A seek targeted an offset outside the partition's retained range.
    #[error("offset {offset} out of range for {key} (first={first}, last={last})")]
    OffsetOutOfRange {
        /// The partition that was seeked.
        key: PartitionKey,
        /// The requested offset.
        offset: Offset,
        /// First retained offset.
        first: Offset,
        /// One past the last retained offset.
        last: Offset,
    },

    /// The partition is not in the current assignment set.
    #[error("partition {key} is not assigned")]
    NotAssigned {
        /// The partition that was not assigned.
        key: PartitionKey,
    },

    /// A transient broker/metadata failure. Retryable.
    ///
    /// Carries the partition when the failure is scoped to one; `None`
    /// means the whole poll failed.
    #[error("transient log failure in {operation}: {message}")]
    Transient {
        /// The operation that failed.
        operation: &'static str,
        /// Failure detail.
        message: String,
        /// The affected partition, if the failure is partition-scoped.
        key: Option<PartitionKey>,
    },

    /// The log client has been closed.
    #[error("log client closed")]
    Closed,
}

impl LogError {
    /// Returns the partition this error is scoped to, if any.
    #[must_use]
    pub const fn partition(&self) -> Option<&PartitionKey> {
        match self {
            Self::OffsetOutOfRange { key, .. } | Self::NotAssigned { key } => Some(key),
            Self::Transient { key, .. } => key.as_ref(),
            Self::Closed => None,
        }
    }

    /// Returns true if the operation may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
