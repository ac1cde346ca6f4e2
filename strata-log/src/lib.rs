//! Strata Log - ordered partitioned replication log abstraction.
//!
//! Storage nodes ingest replicated writes by tailing an external ordered,
//! partitioned log. This crate defines the capability interface the ingestion
//! engine consumes ([`ReplicationLog`]) so any broker client can be
//! substituted without touching the ingestion logic, plus an in-memory
//! [`SimulatedLog`] with deterministic fault injection for tests.
//!
//! # Guarantees
//!
//! - Records within one partition are delivered in offset order.
//! - No ordering is guaranteed across partitions.
//! - `poll` returns within the caller's timeout, possibly empty.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod log;
mod simulated;

pub use error::{LogError, LogResult};
pub use log::{PolledRecords, ReplicationLog};
pub use simulated::{LogFaultConfig, SimulatedLog};
