//! Local storage engine collaborator.
//!
//! The pluggable per-store-version key-value engine that ingestion writes
//! into. The engine may be read concurrently by the serving path; write
//! exclusivity per partition comes from subscription ownership (only the
//! task holding a partition's subscription writes it), not from engine
//! locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use strata_core::PartitionId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from the local storage engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A write operation failed.
    #[error("storage write failed in {operation}: {message}")]
    WriteFailed {
        /// The operation that failed.
        operation: &'static str,
        /// Failure detail.
        message: String,
    },
}

/// Pluggable local key-value storage engine, one instance per store-version.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Writes a key-value pair into a partition.
    async fn put(&self, partition: PartitionId, key: Bytes, value: Bytes) -> StorageResult<()>;

    /// Removes a key from a partition.
    async fn delete(&self, partition: PartitionId, key: Bytes) -> StorageResult<()>;
}

/// One recorded storage mutation, for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// A put call.
    Put {
        /// Target partition.
        partition: PartitionId,
        /// The key written.
        key: Bytes,
        /// The value written.
        value: Bytes,
    },
    /// A delete call.
    Delete {
        /// Target partition.
        partition: PartitionId,
        /// The key removed.
        key: Bytes,
    },
}

#[derive(Debug, Default)]
struct SimulatedStorageInner {
    /// Partition -> key -> value.
    data: HashMap<PartitionId, HashMap<Bytes, Bytes>>,
    /// Every mutation, in call order.
    ops: Vec<StorageOp>,
    /// Fail the next N writes (counts down).
    force_write_failures: u32,
}

/// In-memory storage engine that records every call, for tests.
///
/// Clones share state via `Arc` so a test can inspect the engine while an
/// ingestion task writes through another handle.
#[derive(Debug, Clone, Default)]
pub struct SimulatedStorageEngine {
    inner: Arc<Mutex<SimulatedStorageInner>>,
}

impl SimulatedStorageEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    pub fn force_write_failures(&self, count: u32) {
        self.inner.lock().expect("storage lock poisoned").force_write_failures = count;
    }

    /// Returns the value stored for a key, if any.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn get(&self, partition: PartitionId, key: &[u8]) -> Option<Bytes> {
        let inner = self.inner.lock().expect("storage lock poisoned");
        inner.data.get(&partition)?.get(key).cloned()
    }

    /// Returns all recorded mutations in call order.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn ops(&self) -> Vec<StorageOp> {
        self.inner.lock().expect("storage lock poisoned").ops.clone()
    }

    /// Returns the number of recorded mutations.
    ///
    /// # Panics
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.inner.lock().expect("storage lock poisoned").ops.len()
    }

    fn check_fault(&self, operation: &'static str) -> StorageResult<()> {
        let mut inner = self.inner.lock().expect("storage lock poisoned");
        if inner.force_write_failures > 0 {
            inner.force_write_failures -= 1;
            return Err(StorageError::WriteFailed {
                operation,
                message: "simulated failure (forced)".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageEngine for SimulatedStorageEngine {
    async fn put(&self, partition: PartitionId, key: Bytes, value: Bytes) -> StorageResult<()> {
        self.check_fault("put")?;
        let mut inner = self.inner.lock().expect("storage lock poisoned");
        inner
            .data
            .entry(partition)
            .or_default()
            .insert(key.clone(), value.clone());
        inner.ops.push(StorageOp::Put {
            partition,
            key,
            value,
        });
        Ok(())
    }

    async fn delete(&self, partition: PartitionId, key: Bytes) -> StorageResult<()> {
        self.check_fault("delete")?;
        let mut inner = self.inner.lock().expect("storage lock poisoned");
        if let Some(partition_data) = inner.data.get_mut(&partition) {
            partition_data.remove(&key);
        }
        inner.ops.push(StorageOp::Delete { partition, key });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let engine = SimulatedStorageEngine::new();
        let partition = PartitionId::new(0);
        engine
            .put(partition, Bytes::from("k"), Bytes::from("v"))
            .await
            .unwrap();

        assert_eq!(engine.get(partition, b"k"), Some(Bytes::from("v")));
        assert_eq!(engine.op_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_key() {
        let engine = SimulatedStorageEngine::new();
        let partition = PartitionId::new(0);
        engine
            .put(partition, Bytes::from("k"), Bytes::from("v"))
            .await
            .unwrap();
        engine.delete(partition, Bytes::from("k")).await.unwrap();

        assert_eq!(engine.get(partition, b"k"), None);
        assert_eq!(
            engine.ops()[1],
            StorageOp::Delete {
                partition,
                key: Bytes::from("k"),
            }
        );
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let engine = SimulatedStorageEngine::new();
        engine
            .put(PartitionId::new(0), Bytes::from("k"), Bytes::from("v"))
            .await
            .unwrap();

        assert_eq!(engine.get(PartitionId::new(1), b"k"), None);
    }

    #[tokio::test]
    async fn test_forced_write_failures() {
        let engine = SimulatedStorageEngine::new();
        engine.force_write_failures(1);

        let err = engine
            .put(PartitionId::new(0), Bytes::from("k"), Bytes::from("v"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::WriteFailed { .. }));

        // Failure is consumed; the engine recorded nothing.
        assert_eq!(engine.op_count(), 0);
        engine
            .put(PartitionId::new(0), Bytes::from("k"), Bytes::from("v"))
            .await
            .unwrap();
        assert_eq!(engine.op_count(), 1);
    }
}
