//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.
//! Every queue, buffer, and resource has an explicit maximum size.
//! This prevents unbounded growth and makes the system predictable.

/// System-wide limits for Strata ingestion.
///
/// All limits are explicit and configurable. Default values are chosen
/// to be safe for most deployments while allowing customization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Record limits.
    /// Maximum size of a record key in bytes.
    pub record_key_bytes_max: u32,
    /// Maximum size of a record value in bytes.
    pub record_value_bytes_max: u32,

    // Ingestion limits.
    /// Maximum records returned by a single log poll.
    pub records_per_poll_max: u32,
    /// Maximum partitions one ingestion task may own.
    pub partitions_per_task_max: u32,
    /// Maximum control commands queued per task.
    pub control_commands_max: u32,
    /// Maximum buffered (unflushed) checkpoints per task.
    pub buffered_checkpoints_max: u32,
    /// Maximum notifiers registered on one bus.
    pub notifiers_max: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    ///
    /// These defaults are chosen to be conservative and safe for most
    /// deployments. Production systems should tune these based on their
    /// hardware and workload characteristics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Records: 4KB keys, 1MB values.
            record_key_bytes_max: 4 * 1024,
            record_value_bytes_max: 1024 * 1024,

            // Ingestion: 10k records/poll, 4096 partitions/task.
            records_per_poll_max: 10_000,
            partitions_per_task_max: 4096,
            control_commands_max: 1000,
            buffered_checkpoints_max: 4096,
            notifiers_max: 64,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.record_value_bytes_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "record_value_bytes_max",
                reason: "must be positive",
            });
        }
        if self.records_per_poll_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "records_per_poll_max",
                reason: "must be positive",
            });
        }
        if self.control_commands_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "control_commands_max",
                reason: "must be positive",
            });
        }

        // Every owned partition must be able to buffer a checkpoint.
        if self.buffered_checkpoints_max < self.partitions_per_task_max {
            return Err(crate::Error::InvalidArgument {
                name: "buffered_checkpoints_max",
                reason: "must be >= partitions_per_task_max",
            });
        }

        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
