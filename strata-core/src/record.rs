//! Replication log record types.
//!
//! A [`LogRecord`] is the unit the replication log delivers to a storage
//! node: a PUT or DELETE at a partition-local offset. Records are produced
//! by the external log broker and are immutable once created.
//!
//! # Offsets
//!
//! Offsets are assigned by the broker and are strictly increasing within a
//! partition. They carry no meaning across partitions.

use bytes::Bytes;

use crate::limits::Limits;
use crate::{Error, Result, SchemaId};

/// Offset of a record within its partition log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw offset value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next offset.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the offset for "earliest" (beginning of log).
    #[must_use]
    pub const fn earliest() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of storage mutation a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Write the record value under the record key.
    Put,
    /// Remove the record key. The record value is empty.
    Delete,
}

/// A single record delivered from the replication log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Position in the partition (assigned by the broker).
    pub offset: Offset,
    /// The mutation this record carries.
    pub operation: Operation,
    /// The storage key.
    pub key: Bytes,
    /// The storage value. Empty for [`Operation::Delete`].
    pub value: Bytes,
    /// Schema the value was written with, if the topic is schema-aware.
    pub schema_id: Option<SchemaId>,
}

impl LogRecord {
    /// Creates a PUT record.
    #[must_use]
    pub fn put(offset: Offset, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            offset,
            operation: Operation::Put,
            key: key.into(),
            value: value.into(),
            schema_id: None,
        }
    }

    /// Creates a DELETE record. The value is empty.
    #[must_use]
    pub fn delete(offset: Offset, key: impl Into<Bytes>) -> Self {
        Self {
            offset,
            operation: Operation::Delete,
            key: key.into(),
            value: Bytes::new(),
            schema_id: None,
        }
    }

    /// Sets the schema identifier.
    #[must_use]
    pub const fn with_schema(mut self, schema_id: SchemaId) -> Self {
        self.schema_id = Some(schema_id);
        self
    }

    /// Returns the approximate size of the record in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        8 + 1 + 4 + self.key.len() + 4 + self.value.len()
    }

    /// Validates the record against limits.
    ///
    /// # Errors
    /// Returns an error if the key or value exceeds its limit, or if a
    /// DELETE record carries a non-empty value.
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        if self.key.len() as u64 > u64::from(limits.record_key_bytes_max) {
            return Err(Error::LimitExceeded {
                limit: "record_key_bytes_max",
                max: u64::from(limits.record_key_bytes_max),
                actual: self.key.len() as u64,
            });
        }
        if self.value.len() as u64 > u64::from(limits.record_value_bytes_max) {
            return Err(Error::LimitExceeded {
                limit: "record_value_bytes_max",
                max: u64::from(limits.record_value_bytes_max),
                actual: self.value.len() as u64,
            });
        }
        if self.operation == Operation::Delete && !self.value.is_empty() {
            return Err(Error::InvalidArgument {
                name: "value",
                reason: "DELETE records must carry an empty value",
            });
        }
        Ok(())
    }
}
