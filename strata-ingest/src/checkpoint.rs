//! Buffered, monotonic checkpoint writes.
//!
//! The apply loop must never stall on the offset store, so progress is
//! buffered in memory and flushed in batches: on a fixed interval, when a
//! partition is retired, and on task close.
//!
//! # Monotonicity
//!
//! A flushed offset never regresses. Even if a reset rewinds in-memory
//! consumption, the durable floor only advances again once re-application
//! passes the previous high-water mark.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use strata_core::{Offset, PartitionId, PartitionKey, TopicName};
use tracing::{debug, warn};

use crate::config::IngestionConfig;
use crate::error::{IngestionError, IngestionResult};
use crate::offsets::{CheckpointRecord, OffsetStore};

/// Buffers per-partition progress and persists it through the offset store.
///
/// Owned by a single ingestion task; never shared.
pub struct OffsetCheckpointer {
    store: Arc<dyn OffsetStore>,
    topic: TopicName,
    /// Newest unflushed offset per partition.
    pending: HashMap<PartitionId, Offset>,
    /// Highest offset ever flushed per partition (the monotonic floor).
    flushed: HashMap<PartitionId, Offset>,
    /// When the last interval flush ran.
    last_flush: Instant,
    config: IngestionConfig,
}

impl OffsetCheckpointer {
    /// Creates a checkpointer for one topic.
    #[must_use]
    pub fn new(store: Arc<dyn OffsetStore>, topic: TopicName, config: IngestionConfig) -> Self {
        Self {
            store,
            topic,
            pending: HashMap::new(),
            flushed: HashMap::new(),
            last_flush: Instant::now(),
            config,
        }
    }

    /// Buffers a partition's progress for the next flush. Keeps only the
    /// newest offset per partition.
    pub fn schedule(&mut self, partition: PartitionId, offset: Offset) {
        let slot = self.pending.entry(partition).or_insert(offset);
        if offset > *slot {
            *slot = offset;
        }
        debug_assert!(
            self.pending.len() <= self.config.limits.buffered_checkpoints_max as usize,
            "buffered checkpoints exceed limit"
        );
    }

    /// Returns the number of partitions with unflushed progress.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Flushes all buffered checkpoints if the flush interval has elapsed.
    ///
    /// # Errors
    /// Returns the first flush failure after attempting every partition.
    pub async fn maybe_flush(&mut self) -> IngestionResult<()> {
        if self.last_flush.elapsed() < self.config.checkpoint_flush_interval {
            return Ok(());
        }
        self.flush_all().await
    }

    /// Flushes one partition's buffered checkpoint, if any. Used when the
    /// partition is unsubscribed or fails.
    ///
    /// # Errors
    /// Returns [`IngestionError::CheckpointFlush`] if the write fails; the
    /// offset stays buffered so close() can retry.
    pub async fn flush_partition(&mut self, partition: PartitionId) -> IngestionResult<()> {
        let Some(offset) = self.pending.get(&partition).copied() else {
            return Ok(());
        };
        self.write(partition, offset).await?;
        self.pending.remove(&partition);
        Ok(())
    }

    /// Flushes every buffered checkpoint.
    ///
    /// All partitions are attempted even when one fails; the first failure
    /// is returned after the sweep and the failed offsets stay buffered.
    ///
    /// # Errors
    /// Returns the first [`IngestionError::CheckpointFlush`] encountered.
    pub async fn flush_all(&mut self) -> IngestionResult<()> {
        self.last_flush = Instant::now();

        let batch: Vec<(PartitionId, Offset)> =
            self.pending.iter().map(|(&p, &o)| (p, o)).collect();
        let mut first_failure = None;
        for (partition, offset) in batch {
            match self.write(partition, offset).await {
                Ok(()) => {
                    self.pending.remove(&partition);
                }
                Err(err) => {
                    warn!(topic = %self.topic, partition = partition.get(), %err,
                        "checkpoint flush failed");
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Discards a partition's buffered progress without flushing. This is
    /// the kill path: an explicit, accepted data-loss mode for partitions
    /// being permanently retired.
    pub fn discard_partition(&mut self, partition: PartitionId) {
        self.pending.remove(&partition);
        self.flushed.remove(&partition);
    }

    /// Writes one checkpoint, honoring the monotonic floor.
    async fn write(&mut self, partition: PartitionId, offset: Offset) -> IngestionResult<()> {
        if let Some(&floor) = self.flushed.get(&partition) {
            if offset <= floor {
                // Below the durable floor (offset was reset); nothing to do.
                debug!(topic = %self.topic, partition = partition.get(),
                    %offset, %floor, "skipping checkpoint below floor");
                return Ok(());
            }
        }

        self.store
            .record_offset(&self.topic, partition, CheckpointRecord::new(offset))
            .await
            .map_err(|err| IngestionError::CheckpointFlush {
                key: PartitionKey::new(self.topic.clone(), partition),
                offset,
                reason: err.to_string(),
            })?;
        self.flushed.insert(partition, offset);
        debug!(topic = %self.topic, partition = partition.get(), %offset, "checkpointed");
        Ok(())
    }
}

impl std::fmt::Debug for OffsetCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetCheckpointer")
            .field("topic", &self.topic)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::InMemoryOffsetStore;

    fn checkpointer(store: &InMemoryOffsetStore) -> OffsetCheckpointer {
        OffsetCheckpointer::new(
            Arc::new(store.clone()),
            TopicName::new("store_v1"),
            IngestionConfig::for_testing(),
        )
    }

    const P0: PartitionId = PartitionId::new(0);

    #[tokio::test]
    async fn test_schedule_keeps_newest_offset() {
        let store = InMemoryOffsetStore::new();
        let mut checkpointer = checkpointer(&store);

        checkpointer.schedule(P0, Offset::new(10));
        checkpointer.schedule(P0, Offset::new(15));
        checkpointer.schedule(P0, Offset::new(13));
        checkpointer.flush_all().await.unwrap();

        assert_eq!(store.stored(&TopicName::new("store_v1"), P0), Some(Offset::new(15)));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_partition_clears_pending() {
        let store = InMemoryOffsetStore::new();
        let mut checkpointer = checkpointer(&store);

        checkpointer.schedule(P0, Offset::new(5));
        checkpointer.flush_partition(P0).await.unwrap();
        assert_eq!(checkpointer.pending_count(), 0);

        // Nothing pending: flush is a no-op.
        checkpointer.flush_partition(P0).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_floor_never_regresses() {
        let store = InMemoryOffsetStore::new();
        let mut checkpointer = checkpointer(&store);
        let topic = TopicName::new("store_v1");

        checkpointer.schedule(P0, Offset::new(20));
        checkpointer.flush_all().await.unwrap();

        // A reset rewound consumption; re-applied progress below the floor
        // is not persisted.
        checkpointer.schedule(P0, Offset::new(7));
        checkpointer.flush_all().await.unwrap();
        assert_eq!(store.stored(&topic, P0), Some(Offset::new(20)));
        assert_eq!(store.write_count(), 1);

        // Once re-application passes the old high-water mark the floor
        // advances again.
        checkpointer.schedule(P0, Offset::new(25));
        checkpointer.flush_all().await.unwrap();
        assert_eq!(store.stored(&topic, P0), Some(Offset::new(25)));
    }

    #[tokio::test]
    async fn test_failed_flush_stays_buffered() {
        let store = InMemoryOffsetStore::new();
        let mut checkpointer = checkpointer(&store);

        checkpointer.schedule(P0, Offset::new(3));
        store.force_write_failures(1);
        let err = checkpointer.flush_all().await.unwrap_err();
        assert!(matches!(err, IngestionError::CheckpointFlush { .. }));
        assert_eq!(checkpointer.pending_count(), 1);

        // Retry succeeds.
        checkpointer.flush_all().await.unwrap();
        assert_eq!(store.stored(&TopicName::new("store_v1"), P0), Some(Offset::new(3)));
    }

    #[tokio::test]
    async fn test_discard_partition_loses_progress() {
        let store = InMemoryOffsetStore::new();
        let mut checkpointer = checkpointer(&store);

        checkpointer.schedule(P0, Offset::new(9));
        checkpointer.discard_partition(P0);
        checkpointer.flush_all().await.unwrap();

        assert!(store.stored(&TopicName::new("store_v1"), P0).is_none());
    }

    #[tokio::test]
    async fn test_maybe_flush_respects_interval() {
        let store = InMemoryOffsetStore::new();
        let mut config = IngestionConfig::for_testing();
        config.checkpoint_flush_interval = std::time::Duration::from_secs(3600);
        let mut checkpointer = OffsetCheckpointer::new(
            Arc::new(store.clone()),
            TopicName::new("store_v1"),
            config,
        );

        checkpointer.schedule(P0, Offset::new(1));
        checkpointer.maybe_flush().await.unwrap();
        assert_eq!(store.write_count(), 0);
        assert_eq!(checkpointer.pending_count(), 1);
    }
}
