//! Per-partition consumption state.
//!
//! Owned exclusively by the ingestion task that manages the partition's
//! topic. The task loop is single-threaded, so no locking is needed; this
//! is an explicit single-owner invariant, not an accident of timing.

use strata_core::{Offset, PartitionKey};

/// Subscription lifecycle of a partition.
///
/// ```text
/// Unsubscribed ──subscribe──► Subscribing ──seek confirmed──► Subscribed
///                                                               │    │
///                     unsubscribe / kill ◄──────────────────────┘    │
///                                                                    ▼
///                          Error ◄─────────── unrecoverable failure
///                            │
///                            └──explicit re-subscribe──► Subscribing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    /// Not consuming. Initial state.
    #[default]
    Unsubscribed,
    /// Subscribe accepted, waiting for the log seek to be confirmed.
    Subscribing,
    /// Actively consuming; the only state in which storage is mutated.
    Subscribed,
    /// Failed. Terminal until explicitly re-subscribed.
    Error,
}

/// In-memory consumption record for one partition.
#[derive(Debug, Clone)]
pub struct PartitionConsumptionState {
    /// The partition this state tracks.
    pub key: PartitionKey,
    /// Current lifecycle state.
    pub state: SubscriptionState,
    /// Highest offset applied to storage, `None` before the first apply.
    pub last_processed_offset: Option<Offset>,
    /// Applied records since the last PROGRESS notification.
    records_since_progress: u32,
}

impl PartitionConsumptionState {
    /// Creates state for a fresh subscription, seeded from a checkpoint if
    /// one exists.
    #[must_use]
    pub const fn new(key: PartitionKey, checkpoint: Option<Offset>) -> Self {
        Self {
            key,
            state: SubscriptionState::Subscribing,
            last_processed_offset: checkpoint,
            records_since_progress: 0,
        }
    }

    /// Returns true if records may be applied.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.state == SubscriptionState::Subscribed
    }

    /// Returns true if `offset` is new work for this partition.
    ///
    /// Offsets at or below the high-water mark are duplicates from broker
    /// redelivery. Equal offsets are treated as duplicates too, even though
    /// a redelivered record at the same offset could in principle carry a
    /// different payload; see DESIGN.md for the known ambiguity.
    #[must_use]
    pub fn is_fresh(&self, offset: Offset) -> bool {
        self.last_processed_offset.is_none_or(|last| offset > last)
    }

    /// Advances the high-water mark after a successful apply.
    ///
    /// Returns true if a PROGRESS notification is due, resetting the
    /// cadence counter.
    ///
    /// # Panics
    /// Panics if `offset` does not advance the high-water mark; the caller
    /// must check [`Self::is_fresh`] first.
    pub fn advance(&mut self, offset: Offset, progress_every: u32) -> bool {
        assert!(
            self.is_fresh(offset),
            "advance called with stale offset {offset} (last={:?})",
            self.last_processed_offset
        );
        self.last_processed_offset = Some(offset);
        self.records_since_progress += 1;
        if self.records_since_progress >= progress_every {
            self.records_since_progress = 0;
            return true;
        }
        false
    }

    /// Marks the seek as confirmed; the partition starts applying records.
    pub fn mark_subscribed(&mut self) {
        self.state = SubscriptionState::Subscribed;
    }

    /// Marks the partition failed.
    pub fn mark_error(&mut self) {
        self.state = SubscriptionState::Error;
    }

    /// Rewinds consumption to the beginning of the partition.
    ///
    /// Only the in-memory mark moves; the durable checkpoint floor is
    /// managed separately and never regresses.
    pub fn reset(&mut self) {
        self.last_processed_offset = None;
        self.records_since_progress = 0;
    }
}
