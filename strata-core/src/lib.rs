//! Strata Core - Strongly-typed identifiers and record types for Strata.
//!
//! Strata storage nodes ingest their data from an ordered, partitioned
//! replication log rather than from direct client writes. This crate provides
//! the shared vocabulary for that pipeline: typed identifiers, log offsets,
//! replication records, and system limits.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up `NodeId` with `PartitionId`
//! - **Explicit limits**: Every resource has a bounded maximum
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod record;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use record::{LogRecord, Offset, Operation};
pub use types::{NodeId, PartitionId, PartitionKey, SchemaId, TopicName};
