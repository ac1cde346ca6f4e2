//! In-memory simulated replication log for deterministic testing.
//!
//! `SimulatedLog` keeps records in append order per partition, which lets
//! tests model broker redelivery: a record with a lower or equal offset can
//! be appended after a higher one and will be delivered in exactly that
//! order. Fault injection follows the deterministic seed + counter pattern
//! used by the other simulated collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use strata_core::{LogRecord, Offset, PartitionKey};
use tokio::sync::Notify;

use crate::error::{LogError, LogResult};
use crate::log::{PolledRecords, ReplicationLog};

/// Fault configuration for the simulated log.
#[derive(Debug, Clone, Default)]
pub struct LogFaultConfig {
    /// Fail the next N polls with a transient error (counts down).
    pub force_poll_failures: u32,
    /// Probability of poll operations failing transiently (0.0 - 1.0).
    pub poll_fail_rate: f64,
}

impl LogFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            force_poll_failures: 0,
            poll_fail_rate: 0.0,
        }
    }

    /// Builder: fail the next `count` polls.
    #[must_use]
    pub const fn with_forced_poll_failures(mut self, count: u32) -> Self {
        self.force_poll_failures = count;
        self
    }

    /// Builder: set poll fail rate.
    #[must_use]
    pub const fn with_poll_fail_rate(mut self, rate: f64) -> Self {
        self.poll_fail_rate = rate;
        self
    }
}

/// One partition's record sequence, in append order.
#[derive(Debug, Default)]
struct PartitionLog {
    /// Records in the order they were appended (delivery order).
    records: Vec<LogRecord>,
    /// One past the highest offset ever appended.
    end_offset: Offset,
}

#[derive(Debug, Default)]
struct Inner {
    /// All partitions known to the broker, whether assigned or not.
    partitions: HashMap<PartitionKey, PartitionLog>,
    /// Assigned partitions and their read positions (index into `records`).
    assignment: HashMap<PartitionKey, usize>,
    /// Fault configuration.
    faults: LogFaultConfig,
    /// Set once the client is closed.
    closed: bool,
}

/// In-memory simulated replication log.
///
/// Clones share state via `Arc`, so a test can hold one handle for producing
/// records while the ingestion task polls through another.
#[derive(Debug, Clone)]
pub struct SimulatedLog {
    inner: Arc<Mutex<Inner>>,
    /// Wakes pollers when records are appended.
    notify: Arc<Notify>,
    /// Maximum records returned per partition per poll.
    max_poll_records: u32,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedLog {
    /// Creates a new simulated log with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(Notify::new()),
            max_poll_records: 500,
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a simulated log with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, faults: LogFaultConfig) -> Self {
        let log = Self::new(seed);
        log.inner.lock().expect("log lock poisoned").faults = faults;
        log
    }

    /// Builder: set the per-partition poll batch size.
    #[must_use]
    pub fn with_max_poll_records(mut self, max: u32) -> Self {
        assert!(max > 0, "max_poll_records must be positive");
        self.max_poll_records = max;
        self
    }

    /// Replaces the fault configuration.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn set_faults(&self, faults: LogFaultConfig) {
        self.inner.lock().expect("log lock poisoned").faults = faults;
    }

    /// Appends a record with an explicit offset, modeling broker redelivery:
    /// the offset does not have to advance.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn append(&self, key: &PartitionKey, record: LogRecord) {
        {
            let mut inner = self.inner.lock().expect("log lock poisoned");
            let partition = inner.partitions.entry(key.clone()).or_default();
            if record.offset >= partition.end_offset {
                partition.end_offset = record.offset.next();
            }
            partition.records.push(record);
        }
        self.notify.notify_waiters();
    }

    /// Appends a PUT at the next fresh offset, returning the offset.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn append_put(
        &self,
        key: &PartitionKey,
        record_key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Offset {
        let offset = self.next_offset(key);
        self.append(key, LogRecord::put(offset, record_key, value));
        offset
    }

    /// Appends a DELETE at the next fresh offset, returning the offset.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn append_delete(&self, key: &PartitionKey, record_key: impl Into<Bytes>) -> Offset {
        let offset = self.next_offset(key);
        self.append(key, LogRecord::delete(offset, record_key));
        offset
    }

    /// Closes the client. Subsequent operations fail with [`LogError::Closed`].
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn close(&self) {
        self.inner.lock().expect("log lock poisoned").closed = true;
        self.notify.notify_waiters();
    }

    /// Returns the offset of the next record the given partition would
    /// deliver, if assigned. For test assertions.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn read_position(&self, key: &PartitionKey) -> Option<Offset> {
        let inner = self.inner.lock().expect("log lock poisoned");
        let index = *inner.assignment.get(key)?;
        let partition = inner.partitions.get(key)?;
        partition.records.get(index).map(|r| r.offset)
    }

    fn next_offset(&self, key: &PartitionKey) -> Offset {
        let inner = self.inner.lock().expect("log lock poisoned");
        inner
            .partitions
            .get(key)
            .map_or_else(Offset::earliest, |p| p.end_offset)
    }

    /// Deterministic RNG following the simulated-collaborator pattern:
    /// `(seed + counter) * M`, no RNG crate needed.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    /// Collects available records for every assigned partition, advancing
    /// read positions. Returns `None` if the poll should fail.
    fn collect(&self) -> LogResult<PolledRecords> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        if inner.closed {
            return Err(LogError::Closed);
        }

        if inner.faults.force_poll_failures > 0 {
            inner.faults.force_poll_failures -= 1;
            return Err(LogError::Transient {
                operation: "poll",
                message: "simulated failure (forced)".into(),
                key: None,
            });
        }
        let rate = inner.faults.poll_fail_rate;
        drop(inner);
        if self.should_inject_fault(rate) {
            return Err(LogError::Transient {
                operation: "poll",
                message: "simulated failure (random)".into(),
                key: None,
            });
        }

        let mut inner = self.inner.lock().expect("log lock poisoned");
        let inner = &mut *inner;
        let mut polled = PolledRecords::new();
        let max = self.max_poll_records as usize;
        let partitions = &inner.partitions;
        for (key, position) in &mut inner.assignment {
            let Some(partition) = partitions.get(key) else {
                continue;
            };
            if *position >= partition.records.len() {
                continue;
            }
            let end = (*position + max).min(partition.records.len());
            let batch = partition.records[*position..end].to_vec();
            *position = end;
            polled.extend(key.clone(), batch);
        }
        Ok(polled)
    }
}

#[async_trait]
impl ReplicationLog for SimulatedLog {
    async fn assign(&self, partitions: Vec<PartitionKey>) -> LogResult<()> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        if inner.closed {
            return Err(LogError::Closed);
        }

        // Keep positions for partitions that stay assigned; new ones start
        // at the beginning of the retained records.
        let mut next = HashMap::with_capacity(partitions.len());
        for key in partitions {
            let position = inner.assignment.get(&key).copied().unwrap_or(0);
            next.insert(key, position);
        }
        inner.assignment = next;
        Ok(())
    }

    async fn assignment(&self) -> LogResult<Vec<PartitionKey>> {
        let inner = self.inner.lock().expect("log lock poisoned");
        if inner.closed {
            return Err(LogError::Closed);
        }
        Ok(inner.assignment.keys().cloned().collect())
    }

    async fn seek_to_beginning(&self, key: &PartitionKey) -> LogResult<()> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        if inner.closed {
            return Err(LogError::Closed);
        }
        let Some(position) = inner.assignment.get_mut(key) else {
            return Err(LogError::NotAssigned { key: key.clone() });
        };
        *position = 0;
        Ok(())
    }

    async fn seek(&self, key: &PartitionKey, offset: Offset) -> LogResult<()> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        if inner.closed {
            return Err(LogError::Closed);
        }
        if !inner.assignment.contains_key(key) {
            return Err(LogError::NotAssigned { key: key.clone() });
        }

        let (first, end, index) = inner.partitions.get(key).map_or(
            (Offset::earliest(), Offset::earliest(), 0),
            |partition| {
                let first = partition
                    .records
                    .first()
                    .map_or_else(Offset::earliest, |r| r.offset);
                // Position at the first record at or past the target.
                let index = partition
                    .records
                    .iter()
                    .position(|r| r.offset >= offset)
                    .unwrap_or(partition.records.len());
                (first, partition.end_offset, index)
            },
        );

        if offset > end {
            return Err(LogError::OffsetOutOfRange {
                key: key.clone(),
                offset,
                first,
                last: end,
            });
        }

        let position = inner
            .assignment
            .get_mut(key)
            .ok_or_else(|| LogError::NotAssigned { key: key.clone() })?;
        *position = index;
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> LogResult<PolledRecords> {
        let polled = self.collect()?;
        if !polled.is_empty() {
            return Ok(polled);
        }

        // Nothing available: wait for an append or the timeout, then look
        // one more time. Either way the caller gets control back within
        // the timeout.
        let notified = self.notify.notified();
        tokio::select! {
            () = notified => {}
            () = tokio::time::sleep(timeout) => {}
        }
        self.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{PartitionId, TopicName};

    fn key(partition: u64) -> PartitionKey {
        PartitionKey::new(TopicName::new("store_v1"), PartitionId::new(partition))
    }

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_poll_unassigned_is_empty() {
        let log = SimulatedLog::new(42);
        log.append_put(&key(0), "k", "v");
        let polled = log.poll(POLL).await.unwrap();
        assert!(polled.is_empty());
    }

    #[tokio::test]
    async fn test_assign_and_poll_in_order() {
        let log = SimulatedLog::new(42);
        log.append_put(&key(0), "a", "1");
        log.append_put(&key(0), "b", "2");
        log.assign(vec![key(0)]).await.unwrap();

        let polled = log.poll(POLL).await.unwrap();
        let batches = polled.into_batches();
        let offsets: Vec<u64> = batches[&key(0)].iter().map(|r| r.offset.get()).collect();
        assert_eq!(offsets, vec![0, 1]);

        // Positions advance: nothing left.
        let polled = log.poll(POLL).await.unwrap();
        assert!(polled.is_empty());
    }

    #[tokio::test]
    async fn test_append_order_is_delivery_order() {
        // Broker redelivery: offsets 10, 15, 13, 15 in append order.
        let log = SimulatedLog::new(42);
        let k = key(0);
        log.append(&k, LogRecord::put(Offset::new(10), "a", "1"));
        log.append(&k, LogRecord::delete(Offset::new(15), "b"));
        log.append(&k, LogRecord::put(Offset::new(13), "c", "2"));
        log.append(&k, LogRecord::delete(Offset::new(15), "d"));
        log.assign(vec![k.clone()]).await.unwrap();

        let polled = log.poll(POLL).await.unwrap();
        let batches = polled.into_batches();
        let offsets: Vec<u64> = batches[&k].iter().map(|r| r.offset.get()).collect();
        assert_eq!(offsets, vec![10, 15, 13, 15]);
    }

    #[tokio::test]
    async fn test_seek_to_beginning_replays() {
        let log = SimulatedLog::new(42);
        let k = key(0);
        log.append_put(&k, "a", "1");
        log.assign(vec![k.clone()]).await.unwrap();

        assert_eq!(log.poll(POLL).await.unwrap().record_count(), 1);
        log.seek_to_beginning(&k).await.unwrap();
        assert_eq!(log.poll(POLL).await.unwrap().record_count(), 1);
    }

    #[tokio::test]
    async fn test_seek_to_offset() {
        let log = SimulatedLog::new(42);
        let k = key(0);
        for i in 0..5 {
            log.append_put(&k, format!("k{i}"), "v");
        }
        log.assign(vec![k.clone()]).await.unwrap();
        log.seek(&k, Offset::new(3)).await.unwrap();

        let polled = log.poll(POLL).await.unwrap();
        let batches = polled.into_batches();
        assert_eq!(batches[&k][0].offset, Offset::new(3));
        assert_eq!(batches[&k].len(), 2);
    }

    #[tokio::test]
    async fn test_seek_past_end_is_out_of_range() {
        let log = SimulatedLog::new(42);
        let k = key(0);
        log.append_put(&k, "a", "1");
        log.assign(vec![k.clone()]).await.unwrap();

        let err = log.seek(&k, Offset::new(100)).await.unwrap_err();
        assert!(matches!(err, LogError::OffsetOutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_seek_unassigned_fails() {
        let log = SimulatedLog::new(42);
        let err = log.seek_to_beginning(&key(0)).await.unwrap_err();
        assert_eq!(err, LogError::NotAssigned { key: key(0) });
    }

    #[tokio::test]
    async fn test_assignment_reflects_assign() {
        let log = SimulatedLog::new(42);
        log.assign(vec![key(0), key(1)]).await.unwrap();

        let mut assigned = log.assignment().await.unwrap();
        assigned.sort_by_key(|k| k.partition.get());
        assert_eq!(assigned, vec![key(0), key(1)]);

        log.assign(vec![key(1)]).await.unwrap();
        assert_eq!(log.assignment().await.unwrap(), vec![key(1)]);
    }

    #[tokio::test]
    async fn test_reassign_preserves_position() {
        let log = SimulatedLog::new(42);
        let k = key(0);
        log.append_put(&k, "a", "1");
        log.append_put(&k, "b", "2");
        log.assign(vec![k.clone()]).await.unwrap();
        let _ = log.poll(POLL).await.unwrap();

        // Re-assign with an extra partition; k's position survives.
        log.assign(vec![k.clone(), key(1)]).await.unwrap();
        let polled = log.poll(POLL).await.unwrap();
        assert!(polled.is_empty());
    }

    #[tokio::test]
    async fn test_forced_poll_failures_count_down() {
        let log =
            SimulatedLog::with_faults(42, LogFaultConfig::none().with_forced_poll_failures(2));
        let k = key(0);
        log.append_put(&k, "a", "1");
        log.assign(vec![k.clone()]).await.unwrap();

        assert!(log.poll(POLL).await.unwrap_err().is_transient());
        assert!(log.poll(POLL).await.unwrap_err().is_transient());
        assert_eq!(log.poll(POLL).await.unwrap().record_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_log_rejects_operations() {
        let log = SimulatedLog::new(42);
        log.close();
        assert_eq!(log.poll(POLL).await.unwrap_err(), LogError::Closed);
        assert_eq!(log.assign(vec![key(0)]).await.unwrap_err(), LogError::Closed);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let log = SimulatedLog::new(42);
        let k = key(0);
        log.assign(vec![k.clone()]).await.unwrap();

        let poller = log.clone();
        let waiter = tokio::spawn(async move { poller.poll(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.append_put(&k, "a", "1");

        let polled = waiter.await.unwrap().unwrap();
        assert_eq!(polled.record_count(), 1);
    }
}
