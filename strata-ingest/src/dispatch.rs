//! Applies decoded log records to the local storage engine.
//!
//! One record at a time, under the ordering and deduplication rules:
//! a record is applied at most once, and only while its partition is
//! subscribed. Every accepted record produces exactly one storage call
//! and one high-water-mark advance.

use std::sync::Arc;

use strata_core::{Limits, LogRecord, Operation};
use tracing::trace;

use crate::checkpoint::OffsetCheckpointer;
use crate::error::{IngestionError, IngestionResult};
use crate::notify::NotifierBus;
use crate::state::PartitionConsumptionState;
use crate::storage::StorageEngine;

/// What became of a dispatched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record mutated storage and advanced the high-water mark.
    Applied,
    /// Dropped: the partition is not in the `Subscribed` state.
    DroppedNotSubscribed,
    /// Dropped: duplicate or stale redelivery (offset at or below the
    /// high-water mark). Not an error.
    DroppedDuplicate,
}

/// Applies one record to storage under ordering/dedup rules.
pub struct RecordDispatcher {
    storage: Arc<dyn StorageEngine>,
    notifiers: Arc<NotifierBus>,
    limits: Limits,
    /// Emit a PROGRESS event every N applied records per partition.
    progress_every: u32,
}

impl RecordDispatcher {
    /// Creates a dispatcher writing into `storage`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        notifiers: Arc<NotifierBus>,
        limits: Limits,
        progress_every: u32,
    ) -> Self {
        assert!(progress_every > 0, "progress_every must be positive");
        Self {
            storage,
            notifiers,
            limits,
            progress_every,
        }
    }

    /// Applies one record to the partition it belongs to.
    ///
    /// On success the partition's `last_processed_offset` advances and a
    /// checkpoint is scheduled. Dropped records have no side effects at all.
    ///
    /// # Errors
    /// Returns [`IngestionError::PartitionFatal`] if the storage engine
    /// rejects the write; the record is not considered applied and the
    /// caller must move the partition to `Error`.
    pub async fn apply(
        &self,
        record: &LogRecord,
        state: &mut PartitionConsumptionState,
        checkpointer: &mut OffsetCheckpointer,
    ) -> IngestionResult<DispatchOutcome> {
        if !state.is_subscribed() {
            trace!(key = %state.key, offset = %record.offset, "dropping record: not subscribed");
            return Ok(DispatchOutcome::DroppedNotSubscribed);
        }

        if !state.is_fresh(record.offset) {
            trace!(key = %state.key, offset = %record.offset,
                last = ?state.last_processed_offset, "dropping duplicate record");
            return Ok(DispatchOutcome::DroppedDuplicate);
        }

        record
            .validate(&self.limits)
            .map_err(|err| IngestionError::PartitionFatal {
                key: state.key.clone(),
                reason: format!("malformed record at offset {}: {err}", record.offset),
            })?;

        let partition = state.key.partition;
        let result = match record.operation {
            Operation::Put => {
                self.storage
                    .put(partition, record.key.clone(), record.value.clone())
                    .await
            }
            Operation::Delete => self.storage.delete(partition, record.key.clone()).await,
        };
        result.map_err(|err| IngestionError::PartitionFatal {
            key: state.key.clone(),
            reason: err.to_string(),
        })?;

        let progress_due = state.advance(record.offset, self.progress_every);
        checkpointer.schedule(partition, record.offset);
        if progress_due {
            self.notifiers.progress(&state.key, record.offset);
        }
        Ok(DispatchOutcome::Applied)
    }
}

impl std::fmt::Debug for RecordDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDispatcher")
            .field("progress_every", &self.progress_every)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use strata_core::{Offset, PartitionId, PartitionKey, TopicName};

    use crate::config::IngestionConfig;
    use crate::offsets::InMemoryOffsetStore;
    use crate::storage::{SimulatedStorageEngine, StorageOp};

    struct Fixture {
        dispatcher: RecordDispatcher,
        state: PartitionConsumptionState,
        checkpointer: OffsetCheckpointer,
        storage: SimulatedStorageEngine,
        offsets: InMemoryOffsetStore,
    }

    fn fixture(checkpoint: Option<u64>) -> Fixture {
        let topic = TopicName::new("store_v1");
        let key = PartitionKey::new(topic.clone(), PartitionId::new(0));
        let storage = SimulatedStorageEngine::new();
        let offsets = InMemoryOffsetStore::new();
        let bus = Arc::new(NotifierBus::new(Vec::new()));
        let mut state = PartitionConsumptionState::new(key, checkpoint.map(Offset::new));
        state.mark_subscribed();
        Fixture {
            dispatcher: RecordDispatcher::new(
                Arc::new(storage.clone()),
                bus,
                strata_core::Limits::new(),
                100,
            ),
            state,
            checkpointer: OffsetCheckpointer::new(
                Arc::new(offsets.clone()),
                topic,
                IngestionConfig::for_testing(),
            ),
            storage,
            offsets,
        }
    }

    #[tokio::test]
    async fn test_put_is_applied() {
        let mut f = fixture(None);
        let record = LogRecord::put(Offset::new(10), "k", "v");

        let outcome = f
            .dispatcher
            .apply(&record, &mut f.state, &mut f.checkpointer)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Applied);
        assert_eq!(f.storage.get(PartitionId::new(0), b"k"), Some(Bytes::from("v")));
        assert_eq!(f.state.last_processed_offset, Some(Offset::new(10)));
        assert_eq!(f.checkpointer.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_applied() {
        let mut f = fixture(None);
        let put = LogRecord::put(Offset::new(1), "k", "v");
        let delete = LogRecord::delete(Offset::new(2), "k");

        f.dispatcher
            .apply(&put, &mut f.state, &mut f.checkpointer)
            .await
            .unwrap();
        f.dispatcher
            .apply(&delete, &mut f.state, &mut f.checkpointer)
            .await
            .unwrap();

        assert_eq!(f.storage.get(PartitionId::new(0), b"k"), None);
        assert_eq!(f.state.last_processed_offset, Some(Offset::new(2)));
    }

    #[tokio::test]
    async fn test_stale_offsets_are_dropped() {
        let mut f = fixture(Some(15));

        for offset in [13, 15] {
            let record = LogRecord::put(Offset::new(offset), "ignored", "ignored");
            let outcome = f
                .dispatcher
                .apply(&record, &mut f.state, &mut f.checkpointer)
                .await
                .unwrap();
            assert_eq!(outcome, DispatchOutcome::DroppedDuplicate);
        }

        // Zero storage calls, no offset change, nothing scheduled.
        assert_eq!(f.storage.op_count(), 0);
        assert_eq!(f.state.last_processed_offset, Some(Offset::new(15)));
        assert_eq!(f.checkpointer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_partition_is_silent() {
        let mut f = fixture(None);
        f.state.state = crate::state::SubscriptionState::Subscribing;

        let record = LogRecord::put(Offset::new(1), "k", "v");
        let outcome = f
            .dispatcher
            .apply(&record, &mut f.state, &mut f.checkpointer)
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::DroppedNotSubscribed);
        assert_eq!(f.storage.op_count(), 0);
        assert!(f.state.last_processed_offset.is_none());
    }

    #[tokio::test]
    async fn test_oversized_record_is_partition_fatal() {
        let mut f = fixture(None);
        let huge_key = vec![0u8; strata_core::Limits::new().record_key_bytes_max as usize + 1];
        let record = LogRecord::put(Offset::new(1), huge_key, "v");

        let err = f
            .dispatcher
            .apply(&record, &mut f.state, &mut f.checkpointer)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::PartitionFatal { .. }));
        assert_eq!(f.storage.op_count(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_partition_fatal() {
        let mut f = fixture(None);
        f.storage.force_write_failures(1);

        let record = LogRecord::put(Offset::new(1), "k", "v");
        let err = f
            .dispatcher
            .apply(&record, &mut f.state, &mut f.checkpointer)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestionError::PartitionFatal { .. }));
        // Not considered applied: no offset advance, no checkpoint.
        assert!(f.state.last_processed_offset.is_none());
        assert_eq!(f.checkpointer.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_batching_invariance() {
        // The same in-order record sequence, split across different batch
        // boundaries, must end in identical storage and checkpoint state.
        let records: Vec<LogRecord> = (1..=6)
            .map(|i| LogRecord::put(Offset::new(i), format!("k{i}"), format!("v{i}")))
            .collect();

        let mut final_states = Vec::new();
        for split in [1, 2, 3, 6] {
            let mut f = fixture(None);
            for chunk in records.chunks(split) {
                for record in chunk {
                    f.dispatcher
                        .apply(record, &mut f.state, &mut f.checkpointer)
                        .await
                        .unwrap();
                }
                f.checkpointer.flush_all().await.unwrap();
            }
            final_states.push((
                f.storage.ops(),
                f.state.last_processed_offset,
                f.offsets.stored(&TopicName::new("store_v1"), PartitionId::new(0)),
            ));
        }

        let first = &final_states[0];
        for other in &final_states[1..] {
            assert_eq!(first.0, other.0);
            assert_eq!(first.1, other.1);
            assert_eq!(first.2, other.2);
        }
        assert_eq!(first.1, Some(Offset::new(6)));
        assert_eq!(first.2, Some(Offset::new(6)));
    }

    #[tokio::test]
    async fn test_exactly_one_storage_call_per_accepted_record() {
        let mut f = fixture(None);
        let records = [
            LogRecord::put(Offset::new(10), "TestKeyPut", "TestValuePut"),
            LogRecord::delete(Offset::new(15), "TestKeyDelete"),
            LogRecord::put(Offset::new(13), "Low-Offset-Ignored", "ignored-put"),
            LogRecord::delete(Offset::new(15), "Equal-Offset-Ignored"),
        ];

        for record in &records {
            f.dispatcher
                .apply(record, &mut f.state, &mut f.checkpointer)
                .await
                .unwrap();
        }

        let ops = f.storage.ops();
        assert_eq!(
            ops,
            vec![
                StorageOp::Put {
                    partition: PartitionId::new(0),
                    key: Bytes::from("TestKeyPut"),
                    value: Bytes::from("TestValuePut"),
                },
                StorageOp::Delete {
                    partition: PartitionId::new(0),
                    key: Bytes::from("TestKeyDelete"),
                },
            ]
        );
        assert_eq!(f.state.last_processed_offset, Some(Offset::new(15)));
    }
}
