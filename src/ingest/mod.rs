//! Ingest abstraction
//!
//! Overview
//! --------
//! The narrow queue capability the drain pipeline consumes, plus the
//! [`Batch`] accumulator a drain produces. The production implementation is
//! Redis Streams (`crate::redis`); tests substitute in-memory fakes.
//!
//! Nothing retrieved through [`QueueClient`] is removed from the queue until
//! [`QueueClient::ack`] is called for its handle.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::errors::Result;
use crate::transform::{BatchBuffer, BatchLimits, BufferFull};

pub mod drain;

pub use drain::{drain, DrainMode, DrainSettings};

/// Opaque per-delivery token used to acknowledge or reject a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(String);

impl DeliveryHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: DeliveryHandle,
    pub body: Bytes,
}

impl Delivery {
    pub fn new(handle: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            handle: DeliveryHandle::new(handle),
            body: body.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait QueueClient: Send + Sync {
    /// Retrieve at most one message without auto-acknowledgement.
    /// `None` means the queue has nothing left for this consumer.
    async fn poll_once(&self) -> Result<Option<Delivery>>;

    /// Pump delivery events for up to `time_limit` and return whatever
    /// arrived. Returns early with an empty vec when nothing shows up.
    async fn process_events(&self, time_limit: Duration) -> Result<Vec<Delivery>>;

    /// Acknowledge exactly this delivery (never cumulative).
    async fn ack(&self, handle: &DeliveryHandle) -> Result<()>;

    /// Reject a delivery. With `requeue` it stays pending for a later run;
    /// without, it is dropped from the queue.
    async fn reject(&self, handle: &DeliveryHandle, requeue: bool) -> Result<()>;

    async fn publish(&self, exchange: &str, routing_key: &str, body: &Bytes) -> Result<()>;
}

/// Messages drained in one run: their handles, in arrival order, and the
/// buffer holding their decoded bodies.
#[derive(Debug, Default)]
pub struct Batch {
    handles: Vec<DeliveryHandle>,
    buffer: BatchBuffer,
    dead_lettered: usize,
    deferred: usize,
}

impl Batch {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            buffer: BatchBuffer::with_limits(limits),
            ..Self::default()
        }
    }

    /// Add a decoded message. On `BufferFull` the batch is unchanged and the
    /// caller still owns the delivery.
    pub fn push(&mut self, handle: DeliveryHandle, text: &str) -> Result<(), BufferFull> {
        self.buffer.append(text)?;
        self.handles.push(handle);
        Ok(())
    }

    pub(crate) fn record_dead_letter(&mut self) {
        self.dead_lettered += 1;
    }

    pub(crate) fn record_deferred(&mut self) {
        self.deferred += 1;
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.is_full()
    }

    pub fn handles(&self) -> &[DeliveryHandle] {
        &self.handles
    }

    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    /// Messages rejected to the dead-letter target during this drain.
    pub fn dead_lettered(&self) -> usize {
        self.dead_lettered
    }

    /// Messages retrieved after the buffer filled and left pending.
    pub fn deferred(&self) -> usize {
        self.deferred
    }
}
