//! The per-topic ingestion task and its control handle.
//!
//! One [`StoreIngestionTask`] owns all consumption for one topic (one
//! store-version). It runs as a single tokio task and is the only thread of
//! control that touches the log client, the per-partition states, and the
//! checkpointer, so none of them need locks.
//!
//! Callers hold an [`IngestionTaskHandle`], which enqueues
//! [`ControlCommand`]s into a bounded mailbox and returns without waiting.
//! Commands are absorbed at the top of every apply cycle, so a subscribe or
//! kill takes effect within one cycle even while records are flowing.
//! Outcomes are observed through the notifier bus, not through the control
//! calls; only [`IngestionTaskHandle::close`] waits for the loop to finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use strata_core::{Offset, PartitionKey, TopicName};
use strata_log::{LogError, PolledRecords, ReplicationLog};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::checkpoint::OffsetCheckpointer;
use crate::config::IngestionConfig;
use crate::dispatch::{DispatchOutcome, RecordDispatcher};
use crate::error::{IngestionError, IngestionResult};
use crate::notify::{IngestionNotifier, NotifierBus};
use crate::offsets::OffsetStore;
use crate::state::{PartitionConsumptionState, SubscriptionState};
use crate::storage::StorageEngine;

/// A control request enqueued into an ingestion task's mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start consuming a partition, resuming from its checkpoint (or from
    /// `start_offset` when given, overriding the checkpoint).
    Subscribe {
        /// The partition to consume.
        key: PartitionKey,
        /// Explicit resume point: the last offset already applied. `None`
        /// resumes from the durable checkpoint.
        start_offset: Option<Offset>,
    },
    /// Stop consuming a partition cleanly: flush its checkpoint and report
    /// completion.
    Unsubscribe {
        /// The partition to retire.
        key: PartitionKey,
    },
    /// Rewind a partition to the beginning of the log for re-ingestion.
    ResetOffset {
        /// The partition to rewind.
        key: PartitionKey,
    },
    /// Drop a partition immediately, without flushing or reporting. An
    /// explicit data-loss mode for partitions being torn down.
    Kill {
        /// The partition to drop.
        key: PartitionKey,
    },
    /// Stop the whole task after flushing every buffered checkpoint and
    /// reporting completion for every partition. Sent by
    /// [`IngestionTaskHandle::close`].
    Close,
}

/// Whether the apply loop keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Consumes one topic's replication log and applies records to storage.
pub struct StoreIngestionTask {
    topic: TopicName,
    log: Arc<dyn ReplicationLog>,
    offset_store: Arc<dyn OffsetStore>,
    dispatcher: RecordDispatcher,
    checkpointer: OffsetCheckpointer,
    notifiers: Arc<NotifierBus>,
    /// Every partition this task tracks, including failed ones.
    partitions: HashMap<PartitionKey, PartitionConsumptionState>,
    mailbox: mpsc::Receiver<ControlCommand>,
    config: IngestionConfig,
}

impl StoreIngestionTask {
    /// Runs the apply loop to completion.
    ///
    /// Returns `Ok(())` after a clean close, or the fatal error that ended
    /// the task. Either way every tracked partition has received its
    /// terminal notification before this returns.
    #[instrument(skip(self), fields(topic = %self.topic, node = self.config.node_id.get()))]
    async fn run(mut self) -> IngestionResult<()> {
        info!("ingestion task started");
        let result = self.run_loop().await;

        match &result {
            Ok(()) => info!("ingestion task closed"),
            Err(err) => {
                warn!(%err, "ingestion task failed");
                // Best-effort flush, then report the failure to every
                // partition still tracked.
                if let Err(flush_err) = self.checkpointer.flush_all().await {
                    warn!(%flush_err, "final checkpoint flush failed");
                }
                for key in self.partitions.keys() {
                    self.notifiers.error(key, &err.to_string());
                    self.notifiers.forget(key);
                }
            }
        }
        result
    }

    async fn run_loop(&mut self) -> IngestionResult<()> {
        loop {
            if self.drain_commands().await? == Flow::Stop {
                return Ok(());
            }

            // No partitions to poll: park on the mailbox instead of spinning.
            if self.partitions.is_empty() {
                let Some(command) = self.mailbox.recv().await else {
                    return Err(self.mailbox_lost());
                };
                if self.handle_command(command).await? == Flow::Stop {
                    return Ok(());
                }
                continue;
            }

            let polled = match self.fetch().await {
                Ok(polled) => polled,
                Err(err) => {
                    match err.partition().cloned() {
                        Some(key) => {
                            // Scoped to one partition: quarantine it and
                            // keep ingesting the rest.
                            self.fail_partition(&key, &err.to_string()).await?;
                            continue;
                        }
                        None => return Err(err),
                    }
                }
            };

            debug_assert!(
                polled.record_count() <= self.config.limits.records_per_poll_max as usize,
                "poll returned more records than records_per_poll_max"
            );

            let was_empty = polled.is_empty();
            self.apply_batches(polled).await?;

            if let Err(err) = self.checkpointer.maybe_flush().await {
                // Offsets stay buffered; the next flush retries them.
                warn!(%err, "periodic checkpoint flush failed");
            }

            if was_empty {
                tokio::time::sleep(self.config.read_cycle_delay).await;
            }
        }
    }

    /// Absorbs every command already queued, without blocking.
    async fn drain_commands(&mut self) -> IngestionResult<Flow> {
        loop {
            match self.mailbox.try_recv() {
                Ok(command) => {
                    if self.handle_command(command).await? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(Flow::Continue),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(self.mailbox_lost()),
            }
        }
    }

    async fn handle_command(&mut self, command: ControlCommand) -> IngestionResult<Flow> {
        debug!(?command, "handling control command");
        match command {
            ControlCommand::Subscribe { key, start_offset } => {
                self.subscribe(key, start_offset).await?;
            }
            ControlCommand::Unsubscribe { key } => self.unsubscribe(&key).await?,
            ControlCommand::ResetOffset { key } => self.reset_offset(&key).await,
            ControlCommand::Kill { key } => self.kill(&key).await?,
            ControlCommand::Close => {
                self.close_all().await;
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn subscribe(
        &mut self,
        key: PartitionKey,
        start_offset: Option<Offset>,
    ) -> IngestionResult<()> {
        assert_eq!(key.topic, self.topic, "partition belongs to another topic");

        if let Some(existing) = self.partitions.get(&key) {
            if existing.is_subscribed() {
                warn!(%key, "already subscribed, ignoring");
                return Ok(());
            }
            // Error or mid-subscribe: fall through and re-subscribe fresh.
        }
        if self.partitions.len() >= self.config.limits.partitions_per_task_max as usize
            && !self.partitions.contains_key(&key)
        {
            self.notifiers.started(&key);
            self.notifiers.error(&key, "partition limit reached");
            return Ok(());
        }

        // Resume point: explicit override first, durable checkpoint second.
        let resume_from = match start_offset {
            Some(offset) => Some(offset),
            None => match self
                .offset_store
                .last_offset(&key.topic, key.partition)
                .await
            {
                Ok(checkpoint) => checkpoint,
                Err(err) => {
                    warn!(%key, %err, "offset lookup failed, cannot subscribe");
                    self.notifiers.started(&key);
                    self.notifiers.error(&key, &err.to_string());
                    return Ok(());
                }
            },
        };

        let mut state = PartitionConsumptionState::new(key.clone(), resume_from);
        self.partitions.insert(key.clone(), state.clone());
        self.assign_all().await?;

        // Position the log just past the last applied offset. A checkpoint
        // that fell out of retention degrades to a full replay; dedup makes
        // the replay harmless.
        let seek_result = match resume_from {
            Some(last_applied) => self.log.seek(&key, last_applied.next()).await,
            None => self.log.seek_to_beginning(&key).await,
        };
        match seek_result {
            Ok(()) => {}
            Err(LogError::OffsetOutOfRange { offset, .. }) => {
                warn!(%key, %offset, "checkpoint out of retention, replaying from start");
                state.reset();
                self.log.seek_to_beginning(&key).await.map_err(|err| {
                    IngestionError::TaskFatal {
                        topic: self.topic.clone(),
                        reason: err.to_string(),
                    }
                })?;
            }
            Err(err) => {
                warn!(%key, %err, "seek failed, cannot subscribe");
                self.partitions.remove(&key);
                self.assign_all().await?;
                self.notifiers.started(&key);
                self.notifiers.error(&key, &err.to_string());
                return Ok(());
            }
        }

        state.mark_subscribed();
        info!(%key, resume = ?resume_from, "subscribed");
        self.partitions.insert(key.clone(), state);
        self.notifiers.started(&key);
        Ok(())
    }

    async fn unsubscribe(&mut self, key: &PartitionKey) -> IngestionResult<()> {
        let Some(state) = self.partitions.remove(key) else {
            warn!(%key, "unsubscribe for untracked partition, ignoring");
            return Ok(());
        };

        if let Err(err) = self.checkpointer.flush_partition(key.partition).await {
            warn!(%key, %err, "checkpoint flush on unsubscribe failed");
        }
        self.assign_all().await?;
        info!(%key, last = ?state.last_processed_offset, "unsubscribed");
        self.notifiers.completed(key, state.last_processed_offset);
        self.notifiers.forget(key);
        Ok(())
    }

    async fn reset_offset(&mut self, key: &PartitionKey) {
        let Some(state) = self.partitions.get_mut(key) else {
            warn!(%key, "reset for untracked partition, ignoring");
            return;
        };

        if let Err(err) = self.log.seek_to_beginning(key).await {
            warn!(%key, %err, "seek to beginning failed, reset aborted");
            return;
        }
        // Only the in-memory mark rewinds; the durable checkpoint floor is
        // monotonic and stays where it was.
        state.reset();
        info!(%key, "offset reset, re-ingesting from start");
    }

    async fn kill(&mut self, key: &PartitionKey) -> IngestionResult<()> {
        if self.partitions.remove(key).is_none() {
            warn!(%key, "kill for untracked partition, ignoring");
            return Ok(());
        }
        self.checkpointer.discard_partition(key.partition);
        self.assign_all().await?;
        self.notifiers.forget(key);
        info!(%key, "killed without flush");
        Ok(())
    }

    /// Graceful shutdown: flush everything, report completion everywhere.
    async fn close_all(&mut self) {
        if let Err(err) = self.checkpointer.flush_all().await {
            warn!(%err, "checkpoint flush on close failed");
        }
        for (key, state) in self.partitions.drain() {
            self.notifiers.completed(&key, state.last_processed_offset);
            self.notifiers.forget(&key);
        }
    }

    /// Pushes the active partition set to the log client. Failed partitions
    /// stay tracked for re-subscription but are not polled.
    async fn assign_all(&mut self) -> IngestionResult<()> {
        let active: Vec<PartitionKey> = self
            .partitions
            .values()
            .filter(|state| state.state != SubscriptionState::Error)
            .map(|state| state.key.clone())
            .collect();
        self.log
            .assign(active)
            .await
            .map_err(|err| IngestionError::TaskFatal {
                topic: self.topic.clone(),
                reason: format!("assignment update failed: {err}"),
            })
    }

    /// Polls the log, retrying transient failures with a fixed backoff.
    async fn fetch(&mut self) -> IngestionResult<PolledRecords> {
        let mut attempts: u32 = 0;
        loop {
            match self.log.poll(self.config.poll_timeout).await {
                Ok(polled) => return Ok(polled),
                Err(err) if err.is_transient() => {
                    attempts += 1;
                    if attempts > self.config.fetch_retry_count {
                        return Err(IngestionError::TransientFetch {
                            partition: err.partition().cloned(),
                            attempts,
                            reason: err.to_string(),
                        }
                        .escalate(&self.topic));
                    }
                    warn!(attempt = attempts, %err, "transient poll failure, backing off");
                    tokio::time::sleep(self.config.fetch_retry_backoff).await;
                }
                Err(err) => {
                    return Err(match err.partition().cloned() {
                        Some(key) => IngestionError::PartitionFatal {
                            key,
                            reason: err.to_string(),
                        },
                        None => IngestionError::TaskFatal {
                            topic: self.topic.clone(),
                            reason: err.to_string(),
                        },
                    });
                }
            }
        }
    }

    /// Applies one poll's worth of records, partition by partition.
    async fn apply_batches(&mut self, polled: PolledRecords) -> IngestionResult<()> {
        for (key, batch) in polled.into_batches() {
            let Some(mut state) = self.partitions.remove(&key) else {
                // Records for a partition retired mid-poll; drop them.
                debug!(%key, count = batch.len(), "dropping records for untracked partition");
                continue;
            };

            let mut failed = None;
            for record in batch {
                match self
                    .dispatcher
                    .apply(&record, &mut state, &mut self.checkpointer)
                    .await
                {
                    Ok(DispatchOutcome::Applied
                    | DispatchOutcome::DroppedDuplicate
                    | DispatchOutcome::DroppedNotSubscribed) => {}
                    Err(err) => {
                        failed = Some(err);
                        break;
                    }
                }
            }

            self.partitions.insert(key.clone(), state);
            if let Some(err) = failed {
                self.fail_partition(&key, &err.to_string()).await?;
            }
        }
        Ok(())
    }

    /// Moves one partition to `Error`, drops it from the active assignment,
    /// and reports it; the task keeps going.
    async fn fail_partition(&mut self, key: &PartitionKey, reason: &str) -> IngestionResult<()> {
        warn!(%key, reason, "partition failed");
        if let Some(state) = self.partitions.get_mut(key) {
            state.mark_error();
        }
        self.assign_all().await?;
        if let Err(err) = self.checkpointer.flush_partition(key.partition).await {
            warn!(%key, %err, "checkpoint flush for failed partition failed");
        }
        self.notifiers.error(key, reason);
        Ok(())
    }

    fn mailbox_lost(&self) -> IngestionError {
        IngestionError::TaskFatal {
            topic: self.topic.clone(),
            reason: "control mailbox closed with task still running".into(),
        }
    }
}

impl IngestionError {
    /// Widens an exhausted unscoped transient failure to task scope.
    /// Partition-scoped failures keep their scope.
    fn escalate(self, topic: &TopicName) -> Self {
        match self {
            Self::TransientFetch {
                partition: Some(key),
                reason,
                ..
            } => Self::PartitionFatal { key, reason },
            Self::TransientFetch {
                partition: None,
                attempts,
                reason,
            } => Self::TaskFatal {
                topic: topic.clone(),
                reason: format!("poll failed after {attempts} attempts: {reason}"),
            },
            other => other,
        }
    }
}

/// Cloneable control handle to a running ingestion task.
///
/// All methods except [`close`](Self::close) enqueue a command and return as
/// soon as the mailbox accepts it; results surface through the notifier bus.
#[derive(Debug, Clone)]
pub struct IngestionTaskHandle {
    topic: TopicName,
    sender: mpsc::Sender<ControlCommand>,
    join: Arc<Mutex<Option<JoinHandle<IngestionResult<()>>>>>,
}

impl IngestionTaskHandle {
    /// Returns the topic this task ingests.
    #[must_use]
    pub const fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Requests consumption of a partition, resuming from its checkpoint.
    ///
    /// # Errors
    /// Returns [`IngestionError::TaskFatal`] if the task has already stopped.
    pub async fn subscribe_partition(
        &self,
        key: PartitionKey,
        start_offset: Option<Offset>,
    ) -> IngestionResult<()> {
        self.send(ControlCommand::Subscribe { key, start_offset })
            .await
    }

    /// Requests clean retirement of a partition.
    ///
    /// # Errors
    /// Returns [`IngestionError::TaskFatal`] if the task has already stopped.
    pub async fn unsubscribe_partition(&self, key: PartitionKey) -> IngestionResult<()> {
        self.send(ControlCommand::Unsubscribe { key }).await
    }

    /// Requests a rewind of a partition to the start of the log.
    ///
    /// # Errors
    /// Returns [`IngestionError::TaskFatal`] if the task has already stopped.
    pub async fn reset_partition_offset(&self, key: PartitionKey) -> IngestionResult<()> {
        self.send(ControlCommand::ResetOffset { key }).await
    }

    /// Requests an immediate drop of a partition, without flushing.
    ///
    /// # Errors
    /// Returns [`IngestionError::TaskFatal`] if the task has already stopped.
    pub async fn kill_partition(&self, key: PartitionKey) -> IngestionResult<()> {
        self.send(ControlCommand::Kill { key }).await
    }

    /// Stops the task and waits for it to finish.
    ///
    /// Buffered checkpoints are flushed and every partition gets a completion
    /// notification before this returns. Completes within one apply cycle
    /// plus the flush, never waiting for the log to drain.
    ///
    /// # Errors
    /// Returns the task's fatal error if it had already failed.
    pub async fn close(self) -> IngestionResult<()> {
        // A failed task has dropped its mailbox; the join below still
        // surfaces its error.
        if let Err(err) = self.sender.send(ControlCommand::Close).await {
            debug!(topic = %self.topic, %err, "task already stopped");
        }

        let join = self
            .join
            .lock()
            .expect("join handle lock poisoned")
            .take();
        match join {
            Some(handle) => handle.await.map_err(|err| IngestionError::TaskFatal {
                topic: self.topic.clone(),
                reason: format!("ingestion task panicked: {err}"),
            })?,
            // Another clone already joined it.
            None => Ok(()),
        }
    }

    async fn send(&self, command: ControlCommand) -> IngestionResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| IngestionError::TaskFatal {
                topic: self.topic.clone(),
                reason: "ingestion task is not running".into(),
            })
    }
}

/// Spawns an ingestion task for one topic and returns its control handle.
///
/// # Panics
/// Panics if `config` is invalid or too many notifiers are registered.
#[must_use]
pub fn spawn_ingestion_task(
    topic: TopicName,
    log: Arc<dyn ReplicationLog>,
    storage: Arc<dyn StorageEngine>,
    offset_store: Arc<dyn OffsetStore>,
    notifiers: Vec<Box<dyn IngestionNotifier>>,
    config: IngestionConfig,
) -> IngestionTaskHandle {
    assert!(config.validate().is_ok(), "invalid ingestion config");
    assert!(
        notifiers.len() <= config.limits.notifiers_max as usize,
        "notifier count exceeds notifiers_max"
    );

    let (sender, mailbox) = mpsc::channel(config.command_channel_capacity);
    let bus = Arc::new(NotifierBus::new(notifiers));
    let task = StoreIngestionTask {
        topic: topic.clone(),
        log,
        offset_store: Arc::clone(&offset_store),
        dispatcher: RecordDispatcher::new(
            storage,
            Arc::clone(&bus),
            config.limits,
            config.progress_notify_every,
        ),
        checkpointer: OffsetCheckpointer::new(offset_store, topic.clone(), config.clone()),
        notifiers: bus,
        partitions: HashMap::new(),
        mailbox,
        config,
    };
    let join = tokio::spawn(task.run());

    IngestionTaskHandle {
        topic,
        sender,
        join: Arc::new(Mutex::new(Some(join))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use strata_core::PartitionId;
    use strata_log::SimulatedLog;

    use crate::offsets::InMemoryOffsetStore;
    use crate::storage::SimulatedStorageEngine;

    fn topic() -> TopicName {
        TopicName::new("store_v1")
    }

    fn key(partition: u64) -> PartitionKey {
        PartitionKey::new(topic(), PartitionId::new(partition))
    }

    struct Harness {
        log: SimulatedLog,
        storage: SimulatedStorageEngine,
        offsets: InMemoryOffsetStore,
        handle: IngestionTaskHandle,
    }

    fn harness() -> Harness {
        let log = SimulatedLog::new(42);
        let storage = SimulatedStorageEngine::new();
        let offsets = InMemoryOffsetStore::new();
        let handle = spawn_ingestion_task(
            topic(),
            Arc::new(log.clone()),
            Arc::new(storage.clone()),
            Arc::new(offsets.clone()),
            Vec::new(),
            IngestionConfig::for_testing(),
        );
        Harness {
            log,
            storage,
            offsets,
            handle,
        }
    }

    /// Polls `check` until it passes or two seconds elapse.
    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(check(), "condition not reached within deadline");
    }

    #[tokio::test]
    async fn test_subscribe_applies_appended_records() {
        let h = harness();
        h.handle.subscribe_partition(key(0), None).await.unwrap();
        h.log.append_put(&key(0), "k", "v");

        let storage = h.storage.clone();
        eventually(move || storage.get(PartitionId::new(0), b"k").is_some()).await;
        h.handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_flushes_checkpoints() {
        let h = harness();
        h.handle.subscribe_partition(key(0), None).await.unwrap();
        let offset = h.log.append_put(&key(0), "k", "v");

        let storage = h.storage.clone();
        eventually(move || storage.op_count() == 1).await;
        h.handle.close().await.unwrap();

        assert_eq!(
            h.offsets.stored(&topic(), PartitionId::new(0)),
            Some(offset)
        );
    }

    #[tokio::test]
    async fn test_kill_discards_unflushed_progress() {
        let mut config = IngestionConfig::for_testing();
        // Flush far in the future so only close() or unsubscribe could flush.
        config.checkpoint_flush_interval = Duration::from_secs(3600);

        let log = SimulatedLog::new(42);
        let storage = SimulatedStorageEngine::new();
        let offsets = InMemoryOffsetStore::new();
        let handle = spawn_ingestion_task(
            topic(),
            Arc::new(log.clone()),
            Arc::new(storage.clone()),
            Arc::new(offsets.clone()),
            Vec::new(),
            config,
        );

        handle.subscribe_partition(key(0), None).await.unwrap();
        log.append_put(&key(0), "k", "v");
        let probe = storage.clone();
        eventually(move || probe.op_count() == 1).await;

        handle.kill_partition(key(0)).await.unwrap();
        handle.close().await.unwrap();

        // Progress was applied but never checkpointed.
        assert!(offsets.stored(&topic(), PartitionId::new(0)).is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_untracked_is_noop() {
        let h = harness();
        h.handle.unsubscribe_partition(key(7)).await.unwrap();
        h.handle.close().await.unwrap();
        assert_eq!(h.storage.op_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_resumes_past_checkpoint() {
        let h = harness();
        h.offsets.seed(&topic(), PartitionId::new(0), Offset::new(1));

        // Offsets 0..=2 are in the log; only offset 2 is new work.
        for i in 0..3 {
            h.log.append_put(&key(0), format!("k{i}"), "v");
        }
        h.handle.subscribe_partition(key(0), None).await.unwrap();

        let storage = h.storage.clone();
        eventually(move || storage.get(PartitionId::new(0), b"k2").is_some()).await;
        h.handle.close().await.unwrap();

        assert_eq!(h.storage.op_count(), 1);
        assert!(h.storage.get(PartitionId::new(0), b"k0").is_none());
    }

    #[tokio::test]
    async fn test_close_twice_via_clone() {
        let h = harness();
        let other = h.handle.clone();
        h.handle.close().await.unwrap();
        // The second close finds the task already joined.
        other.close().await.unwrap();
    }
}
