//! The ordered partitioned log capability interface.
//!
//! The ingestion engine never talks to a concrete broker client. It consumes
//! this trait, so any log backend (a real broker consumer, the in-memory
//! [`SimulatedLog`](crate::SimulatedLog)) can be substituted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use strata_core::{LogRecord, Offset, PartitionKey};

use crate::error::LogResult;

/// Result of a poll: records grouped by partition.
///
/// Within each partition the records are in offset order, exactly as the
/// log delivered them. Iteration order across partitions is unspecified.
#[derive(Debug, Clone, Default)]
pub struct PolledRecords {
    batches: HashMap<PartitionKey, Vec<LogRecord>>,
}

impl PolledRecords {
    /// Creates an empty poll result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends records for a partition, preserving their order.
    pub fn extend(&mut self, key: PartitionKey, records: Vec<LogRecord>) {
        if records.is_empty() {
            return;
        }
        self.batches.entry(key).or_default().extend(records);
    }

    /// Returns true if no records were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Returns the total number of records across all partitions.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    /// Iterates over per-partition batches.
    pub fn iter(&self) -> impl Iterator<Item = (&PartitionKey, &[LogRecord])> {
        self.batches.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Consumes the result, yielding per-partition batches.
    #[must_use]
    pub fn into_batches(self) -> HashMap<PartitionKey, Vec<LogRecord>> {
        self.batches
    }
}

/// An ordered, partitioned, append-only record stream.
///
/// Contract:
/// - `assign` replaces the full assignment set; positions of partitions that
///   stay assigned are preserved.
/// - `seek*` is only valid for assigned partitions.
/// - `poll` blocks up to `timeout` waiting for records and then returns,
///   possibly empty. In-partition offset order is always preserved.
#[async_trait]
pub trait ReplicationLog: Send + Sync {
    /// Replaces the set of partitions this client consumes from.
    async fn assign(&self, partitions: Vec<PartitionKey>) -> LogResult<()>;

    /// Returns the currently assigned partitions.
    async fn assignment(&self) -> LogResult<Vec<PartitionKey>>;

    /// Moves the read position of a partition to the earliest retained offset.
    async fn seek_to_beginning(&self, key: &PartitionKey) -> LogResult<()>;

    /// Moves the read position of a partition to a specific offset.
    async fn seek(&self, key: &PartitionKey, offset: Offset) -> LogResult<()>;

    /// Fetches the next batch of records, waiting up to `timeout`.
    async fn poll(&self, timeout: Duration) -> LogResult<PolledRecords>;
}
