//! In-memory text buffer for one run's batch.
//!
//! Records are stored line-terminated, in arrival order, with no
//! deduplication. The limits bound a single run; whatever does not fit stays
//! on the queue for the next run.

use bytes::Bytes;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum number of records per run.
    pub max_messages: usize,
    /// Maximum serialized size in bytes, terminators included.
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_messages: 1_000_000,
            max_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("batch buffer full ({records} records, {bytes} bytes)")]
pub struct BufferFull {
    pub records: usize,
    pub bytes: usize,
}

#[derive(Clone, Debug, Default)]
pub struct BatchBuffer {
    text: String,
    records: usize,
    limits: BatchLimits,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: BatchLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Append one record followed by `\n`.
    ///
    /// The first record is always accepted so an oversized message cannot
    /// wedge the queue; after that a record that would cross either limit is
    /// refused and the buffer is left unchanged.
    pub fn append(&mut self, record: &str) -> Result<(), BufferFull> {
        if self.records > 0 && !self.has_room_for(record) {
            return Err(BufferFull {
                records: self.records,
                bytes: self.text.len(),
            });
        }
        self.text.reserve(record.len() + 1);
        self.text.push_str(record);
        self.text.push('\n');
        self.records += 1;
        Ok(())
    }

    fn has_room_for(&self, record: &str) -> bool {
        self.records < self.limits.max_messages
            && self.text.len() + record.len() + 1 <= self.limits.max_bytes
    }

    /// True once no further record can be accepted.
    pub fn is_full(&self) -> bool {
        self.records >= self.limits.max_messages || self.text.len() >= self.limits.max_bytes
    }

    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// All records concatenated in insertion order.
    pub fn serialize(&self) -> Bytes {
        Bytes::copy_from_slice(self.text.as_bytes())
    }
}
