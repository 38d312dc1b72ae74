//! Error types for mq-archiver
//!
//! Overview
//! --------
//! One enumeration per failure class of a run. The drain pipeline branches on
//! these variants: a `Decode` failure is local to one message, a `Persist`
//! failure leaves the whole batch unacknowledged, an `Ack` failure means the
//! checkpoint is durable but some messages will be redelivered.
//!
//! Usage
//! -----
//! - Convert low-level errors at the edge (Redis/S3/SNS/Secrets Manager/zip).
//! - Avoid leaking third-party error types across module boundaries.
//!
//! Concurrency / Logging
//! ---------------------
//! Errors are `Send + Sync` and implement Display via `thiserror`.
//! Use `tracing` for context at call sites (`error!(...);`).
use thiserror::Error;

pub type Result<T, E = ArchiverError> = std::result::Result<T, E>;

/// Failures resolving connection secrets. All of them abort the run before
/// the queue is touched.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("secret {0} not found")]
    NotFound(String),

    #[error("access denied reading secret {0}")]
    AccessDenied(String),

    #[error("secret {0} could not be decrypted")]
    Decryption(String),

    #[error("secret {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },

    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Object-store failures. `NotFound` is the only one callers branch on.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("object store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Error, Debug)]
pub enum ArchiverError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue unreachable before any drain started.
    #[error("Queue connection error: {0}")]
    Connection(String),

    /// Per-message body decode failure; routed to the dead-letter target.
    #[error("Queue message decode error: {0}")]
    Decode(String),

    /// Retrieval failed mid-drain. Nothing was written or acknowledged.
    #[error("Drain error: {0}")]
    Drain(String),

    /// A single queue command (ack, reject, publish, read) failed.
    #[error("Queue command error: {0}")]
    Queue(String),

    /// The checkpoint write did not complete; the batch is not durable.
    #[error("Checkpoint {key} not persisted: {source}")]
    Persist {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The checkpoint is durable but some acknowledgements failed. Those
    /// messages are redelivered and show up again in a later checkpoint.
    #[error("{failed} of {total} acknowledgements failed: {detail}")]
    Ack {
        failed: usize,
        total: usize,
        detail: String,
    },

    #[error("Compaction error: {0}")]
    Compaction(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
