//! Offset store collaborator.
//!
//! Durable "last successfully applied offset" per partition, used to resume
//! ingestion after a restart. The store may be shared by many tasks; a given
//! partition is only ever written by the task that owns its subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_core::{Offset, PartitionId, TopicName};
use thiserror::Error;

/// Result type for offset store operations.
pub type OffsetResult<T> = Result<T, OffsetStoreError>;

/// Errors from the offset store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OffsetStoreError {
    /// A read or write against the backing store failed.
    #[error("offset store {operation} failed: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Failure detail.
        message: String,
    },
}

/// Durable progress record for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Last successfully applied offset.
    pub offset: Offset,
}

impl CheckpointRecord {
    /// Creates a checkpoint record.
    #[must_use]
    pub const fn new(offset: Offset) -> Self {
        Self { offset }
    }
}

/// External durable offset store.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Returns the last checkpointed offset for a partition, if any.
    async fn last_offset(
        &self,
        topic: &TopicName,
        partition: PartitionId,
    ) -> OffsetResult<Option<Offset>>;

    /// Durably records a partition's progress.
    async fn record_offset(
        &self,
        topic: &TopicName,
        partition: PartitionId,
        record: CheckpointRecord,
    ) -> OffsetResult<()>;
}

#[derive(Debug, Default)]
struct InMemoryOffsetStoreInner {
    offsets: HashMap<(TopicName, PartitionId), Offset>,
    write_count: u64,
    force_write_failures: u32,
}

/// In-memory offset store for tests and single-process deployments.
///
/// Clones share state via `Arc`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOffsetStore {
    inner: Arc<Mutex<InMemoryOffsetStoreInner>>,
}

impl InMemoryOffsetStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a checkpoint, as if a previous run had recorded it.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn seed(&self, topic: &TopicName, partition: PartitionId, offset: Offset) {
        let mut inner = self.inner.lock().expect("offset store lock poisoned");
        inner.offsets.insert((topic.clone(), partition), offset);
    }

    /// Makes the next `count` writes fail.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn force_write_failures(&self, count: u32) {
        self.inner
            .lock()
            .expect("offset store lock poisoned")
            .force_write_failures = count;
    }

    /// Returns the stored offset for a partition (bypasses the trait, for
    /// test assertions).
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn stored(&self, topic: &TopicName, partition: PartitionId) -> Option<Offset> {
        let inner = self.inner.lock().expect("offset store lock poisoned");
        inner.offsets.get(&(topic.clone(), partition)).copied()
    }

    /// Returns how many writes the store has accepted.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner
            .lock()
            .expect("offset store lock poisoned")
            .write_count
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn last_offset(
        &self,
        topic: &TopicName,
        partition: PartitionId,
    ) -> OffsetResult<Option<Offset>> {
        let inner = self.inner.lock().expect("offset store lock poisoned");
        Ok(inner.offsets.get(&(topic.clone(), partition)).copied())
    }

    async fn record_offset(
        &self,
        topic: &TopicName,
        partition: PartitionId,
        record: CheckpointRecord,
    ) -> OffsetResult<()> {
        let mut inner = self.inner.lock().expect("offset store lock poisoned");
        if inner.force_write_failures > 0 {
            inner.force_write_failures -= 1;
            return Err(OffsetStoreError::Io {
                operation: "record_offset",
                message: "simulated failure (forced)".into(),
            });
        }
        inner.offsets.insert((topic.clone(), partition), record.offset);
        inner.write_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicName {
        TopicName::new("store_v1")
    }

    #[tokio::test]
    async fn test_missing_offset_is_none() {
        let store = InMemoryOffsetStore::new();
        let last = store.last_offset(&topic(), PartitionId::new(0)).await.unwrap();
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn test_record_then_read() {
        let store = InMemoryOffsetStore::new();
        let partition = PartitionId::new(0);
        store
            .record_offset(&topic(), partition, CheckpointRecord::new(Offset::new(15)))
            .await
            .unwrap();

        let last = store.last_offset(&topic(), partition).await.unwrap();
        assert_eq!(last, Some(Offset::new(15)));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_partitions_do_not_interfere() {
        let store = InMemoryOffsetStore::new();
        store
            .record_offset(&topic(), PartitionId::new(0), CheckpointRecord::new(Offset::new(7)))
            .await
            .unwrap();

        let other = store.last_offset(&topic(), PartitionId::new(1)).await.unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_forced_write_failure() {
        let store = InMemoryOffsetStore::new();
        store.force_write_failures(1);
        let err = store
            .record_offset(&topic(), PartitionId::new(0), CheckpointRecord::new(Offset::new(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, OffsetStoreError::Io { .. }));
        assert_eq!(store.write_count(), 0);
    }
}
