//! Strata Ingest - the replication-log ingestion engine.
//!
//! Strata storage nodes do not take client writes directly. Every write goes
//! through an ordered, partitioned replication log; this crate tails that log
//! and applies PUT/DELETE records to a local storage engine, per partition,
//! in log order, exactly once.
//!
//! # Architecture
//!
//! ```text
//! callers (any thread)
//!       │ subscribe / unsubscribe / reset / kill
//!       ▼
//! ┌───────────────────┐     poll      ┌─────────────────┐
//! │ StoreIngestionTask│──────────────►│ ReplicationLog  │
//! │  (one per topic)  │◄──────────────│  (external)     │
//! └───────────────────┘    records    └─────────────────┘
//!       │ apply                │
//!       ▼                      ▼
//! ┌─────────────────┐   ┌──────────────────┐
//! │ StorageEngine   │   │ OffsetCheckpointer│──► OffsetStore
//! └─────────────────┘   └──────────────────┘
//! ```
//!
//! Each topic (one store-version) gets one [`task::StoreIngestionTask`]
//! running on its own task of execution. Within a task everything is
//! single-threaded: control commands from the mailbox, log polling, and
//! record application never run concurrently, so per-partition state needs
//! no locks. Callers interact through a cloneable [`task::IngestionTaskHandle`]
//! whose methods enqueue commands and return immediately; only `close()`
//! waits, joining the loop after buffered checkpoints are flushed.
//!
//! # Ordering and deduplication
//!
//! The log guarantees in-partition offset order; the engine preserves it
//! end-to-end and drops any record whose offset is at or below the
//! partition's last applied offset, so broker redelivery never double-writes.
//!
//! # Failure isolation
//!
//! Transient fetch failures are retried with a fixed backoff. A failure
//! scoped to one partition moves only that partition to `Error` and the rest
//! of the task keeps ingesting; an unscoped failure after retries ends the
//! task and reports every owned partition. All faults surface through the
//! notifier bus, never through the fire-and-forget control calls.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod offsets;
pub mod state;
pub mod storage;
pub mod task;

pub use checkpoint::OffsetCheckpointer;
pub use codec::{
    CodecError, CodecFactory, CodecRegistry, CodecResult, IdentityCodecFactory, RecordCodec,
    SchemaPair,
};
pub use config::IngestionConfig;
pub use dispatch::{DispatchOutcome, RecordDispatcher};
pub use error::{IngestionError, IngestionResult};
pub use notify::{IngestionNotifier, NotifierBus, NotifierError};
pub use offsets::{
    CheckpointRecord, InMemoryOffsetStore, OffsetResult, OffsetStore, OffsetStoreError,
};
pub use state::{PartitionConsumptionState, SubscriptionState};
pub use storage::{
    SimulatedStorageEngine, StorageEngine, StorageError, StorageOp, StorageResult,
};
pub use task::{spawn_ingestion_task, ControlCommand, IngestionTaskHandle};
