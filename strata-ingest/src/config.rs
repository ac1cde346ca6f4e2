//! Ingestion task configuration.

use std::time::Duration;

use strata_core::{Limits, NodeId};

/// Configuration for one store-version ingestion task.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Identity of the storage node running the task. Used in log fields.
    pub node_id: NodeId,

    /// How long a single log poll may block waiting for records.
    pub poll_timeout: Duration,

    /// Delay between apply cycles when a poll comes back empty.
    pub read_cycle_delay: Duration,

    /// Transient fetch failures tolerated before escalating.
    pub fetch_retry_count: u32,

    /// Fixed backoff between fetch retries.
    pub fetch_retry_backoff: Duration,

    /// How often buffered checkpoints are flushed to the offset store.
    pub checkpoint_flush_interval: Duration,

    /// Emit a PROGRESS notification every N applied records per partition.
    pub progress_notify_every: u32,

    /// Capacity of the control-command mailbox.
    pub command_channel_capacity: usize,

    /// System limits.
    pub limits: Limits,
}

impl IngestionConfig {
    /// Creates a configuration with production defaults.
    #[must_use]
    pub const fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            poll_timeout: Duration::from_millis(1000),
            read_cycle_delay: Duration::from_millis(100),
            fetch_retry_count: 3,
            fetch_retry_backoff: Duration::from_millis(1000),
            checkpoint_flush_interval: Duration::from_secs(10),
            progress_notify_every: 1000,
            command_channel_capacity: 1000,
            limits: Limits::new(),
        }
    }

    /// Creates a configuration with short timers for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            node_id: NodeId::new(0),
            poll_timeout: Duration::from_millis(20),
            read_cycle_delay: Duration::from_millis(5),
            fetch_retry_count: 3,
            fetch_retry_backoff: Duration::from_millis(5),
            checkpoint_flush_interval: Duration::from_millis(20),
            progress_notify_every: 1,
            command_channel_capacity: 64,
            limits: Limits::new(),
        }
    }

    /// Builder: set the poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Builder: set the fetch retry policy.
    #[must_use]
    pub const fn with_fetch_retries(mut self, count: u32, backoff: Duration) -> Self {
        self.fetch_retry_count = count;
        self.fetch_retry_backoff = backoff;
        self
    }

    /// Builder: set the checkpoint flush interval.
    #[must_use]
    pub const fn with_checkpoint_flush_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_flush_interval = interval;
        self
    }

    /// Builder: set the progress notification cadence.
    #[must_use]
    pub const fn with_progress_notify_every(mut self, every: u32) -> Self {
        self.progress_notify_every = every;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if any field is out of range.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.poll_timeout.is_zero() {
            return Err("poll_timeout must be positive");
        }
        if self.progress_notify_every == 0 {
            return Err("progress_notify_every must be positive");
        }
        if self.command_channel_capacity == 0 {
            return Err("command_channel_capacity must be positive");
        }
        if self.command_channel_capacity > self.limits.control_commands_max as usize {
            return Err("command_channel_capacity exceeds control_commands_max");
        }
        if self.limits.validate().is_err() {
            return Err("limits are inconsistent");
        }
        Ok(())
    }
}
