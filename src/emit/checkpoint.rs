//! CheckpointWriter: persist one run's buffer under a time-derived key.
//!
//! Keys have second granularity, so two runs can land on the same key. The
//! write is a read-modify-write that appends the new blob after whatever is
//! already stored, which makes repeated writes additive instead of
//! clobbering.

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use crate::emit::ObjectStore;
use crate::errors::{ArchiverError, StoreError};

#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub key: String,
    pub content: Bytes,
}

/// Confirmation that a checkpoint is durable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointReceipt {
    pub key: String,
    /// Size of the object after the write.
    pub stored_bytes: usize,
    /// True when existing content was found and kept in front of the blob.
    pub merged: bool,
}

pub struct CheckpointWriter<'a, S: ?Sized> {
    store: &'a S,
    bucket: &'a str,
}

impl<'a, S> CheckpointWriter<'a, S>
where
    S: ObjectStore + ?Sized,
{
    pub fn new(store: &'a S, bucket: &'a str) -> Self {
        Self { store, bucket }
    }

    /// Any failure is a `Persist` error and the checkpoint must be treated
    /// as not written. A read failure other than not-found is also fatal:
    /// writing blind would overwrite whatever the failed read would have
    /// returned.
    #[tracing::instrument(skip(self, checkpoint), fields(bucket = %self.bucket, key = %checkpoint.key))]
    pub async fn write(&self, checkpoint: &Checkpoint) -> Result<CheckpointReceipt, ArchiverError> {
        let persist = |source: StoreError| ArchiverError::Persist {
            key: checkpoint.key.clone(),
            source,
        };

        let (body, merged) = match self.store.get(self.bucket, &checkpoint.key).await {
            Ok(existing) => {
                debug!(existing_bytes = existing.len(), "merging with existing checkpoint");
                let mut joined = BytesMut::with_capacity(existing.len() + checkpoint.content.len());
                joined.extend_from_slice(&existing);
                joined.extend_from_slice(&checkpoint.content);
                (joined.freeze(), true)
            }
            Err(e) if e.is_not_found() => (checkpoint.content.clone(), false),
            Err(e) => return Err(persist(e)),
        };

        let stored_bytes = body.len();
        self.store
            .put(self.bucket, &checkpoint.key, body)
            .await
            .map_err(persist)?;

        info!(stored_bytes, merged, "checkpoint written");
        Ok(CheckpointReceipt {
            key: checkpoint.key.clone(),
            stored_bytes,
            merged,
        })
    }
}
