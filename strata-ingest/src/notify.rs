//! Lifecycle and progress notification fan-out.
//!
//! External listeners observe ingestion through the [`IngestionNotifier`]
//! callbacks. Delivery is best-effort: a failure in one notifier is logged
//! and ignored, never aborting the apply loop or starving other notifiers.
//!
//! # Event ordering
//!
//! Per partition, `started` precedes any `progress`, `completed`, or
//! `error`, and at most one terminal event (`completed` or `error`) is
//! delivered per subscription lifetime. A re-subscribe starts a new
//! lifetime.

use std::collections::HashMap;
use std::sync::Mutex;

use strata_core::{Offset, PartitionKey};
use thiserror::Error;
use tracing::warn;

/// Error a notifier may return; the bus reports and swallows it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notifier delivery failed: {message}")]
pub struct NotifierError {
    /// Failure detail.
    pub message: String,
}

impl NotifierError {
    /// Creates a notifier error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// External listener for ingestion lifecycle events.
pub trait IngestionNotifier: Send + Sync {
    /// A partition subscription became active.
    fn started(&self, key: &PartitionKey) -> Result<(), NotifierError>;

    /// A partition applied records up to `offset`. Emitted at a configured
    /// cadence, not for every record.
    fn progress(&self, key: &PartitionKey, offset: Offset) -> Result<(), NotifierError>;

    /// A partition subscription ended cleanly at `offset`.
    fn completed(&self, key: &PartitionKey, offset: Option<Offset>) -> Result<(), NotifierError>;

    /// A partition failed. Terminal until re-subscribed.
    fn error(&self, key: &PartitionKey, reason: &str) -> Result<(), NotifierError>;
}

/// Lifecycle phase the bus tracks per partition to bound event delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// `started` delivered, no terminal event yet.
    Active,
    /// A terminal event was delivered; suppress further terminals until
    /// the next `started`.
    Terminated,
}

/// Fan-out of lifecycle events to registered notifiers.
pub struct NotifierBus {
    notifiers: Vec<Box<dyn IngestionNotifier>>,
    /// Per-partition lifecycle phase, used to suppress duplicate terminal
    /// events within one subscription lifetime.
    phases: Mutex<HashMap<PartitionKey, Phase>>,
}

impl NotifierBus {
    /// Creates a bus over the given notifiers.
    #[must_use]
    pub fn new(notifiers: Vec<Box<dyn IngestionNotifier>>) -> Self {
        Self {
            notifiers,
            phases: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of registered notifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Returns true if no notifiers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Delivers `started`, opening a new subscription lifetime.
    pub fn started(&self, key: &PartitionKey) {
        self.phases
            .lock()
            .expect("notifier phase lock poisoned")
            .insert(key.clone(), Phase::Active);
        self.deliver("started", |n| n.started(key));
    }

    /// Delivers `progress`. Dropped if the partition has no open lifetime.
    pub fn progress(&self, key: &PartitionKey, offset: Offset) {
        if !self.is_active(key) {
            return;
        }
        self.deliver("progress", |n| n.progress(key, offset));
    }

    /// Delivers `completed` once per lifetime, then closes the lifetime.
    pub fn completed(&self, key: &PartitionKey, offset: Option<Offset>) {
        if !self.begin_terminal(key) {
            return;
        }
        self.deliver("completed", |n| n.completed(key, offset));
    }

    /// Delivers `error` once per lifetime, then closes the lifetime.
    pub fn error(&self, key: &PartitionKey, reason: &str) {
        if !self.begin_terminal(key) {
            return;
        }
        self.deliver("error", |n| n.error(key, reason));
    }

    /// Forgets a partition's lifetime (after kill or task close).
    pub fn forget(&self, key: &PartitionKey) {
        self.phases
            .lock()
            .expect("notifier phase lock poisoned")
            .remove(key);
    }

    fn is_active(&self, key: &PartitionKey) -> bool {
        let phases = self.phases.lock().expect("notifier phase lock poisoned");
        phases.get(key) == Some(&Phase::Active)
    }

    /// Transitions a partition to `Terminated`. Returns false if the
    /// partition already delivered its terminal event or never started.
    fn begin_terminal(&self, key: &PartitionKey) -> bool {
        let mut phases = self.phases.lock().expect("notifier phase lock poisoned");
        match phases.get(key) {
            Some(Phase::Active) => {
                phases.insert(key.clone(), Phase::Terminated);
                true
            }
            Some(Phase::Terminated) | None => false,
        }
    }

    fn deliver(
        &self,
        event: &'static str,
        mut call: impl FnMut(&dyn IngestionNotifier) -> Result<(), NotifierError>,
    ) {
        for notifier in &self.notifiers {
            if let Err(err) = call(notifier.as_ref()) {
                // Isolated: one notifier failing never affects the others
                // or the apply loop.
                warn!(event, error = %err, "notifier delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for NotifierBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierBus")
            .field("notifiers", &self.notifiers.len())
            .finish_non_exhaustive()
    }
}
