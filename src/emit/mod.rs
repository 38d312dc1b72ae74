//! Emit side: object storage, checkpoints, archives, dead-letter and
//! notification delivery.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;

use crate::errors::StoreError;

pub mod archive;
pub mod checkpoint;
pub mod dlq;
pub mod notify;
pub mod uploader;

/// Named blobs in buckets. Implementations are cheap handles.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// `StoreError::NotFound` when nothing is stored under `key`.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    async fn put(&self, bucket: &str, key: &str, blob: Bytes) -> Result<(), StoreError>;

    /// Every key under `prefix`, in the store's listing order.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Shapes object keys for checkpoints and daily archives.
pub trait KeyBuilder {
    /// Per-run checkpoint key, second granularity.
    fn checkpoint_key(&self, run_start: &DateTime<Tz>) -> String;
    /// Prefix shared by every checkpoint of `day`.
    fn day_prefix(&self, day: NaiveDate) -> String;
    /// Archive key for `day` in the destination bucket.
    fn archive_key(&self, day: NaiveDate) -> String;
}

/// `{prefix/}YYYY-MM-DD/YYYY-MM-DD HH:MM:SS.txt` checkpoints and
/// `{prefix/}YYYY-MM-DD.zip` archives.
#[derive(Clone, Debug, Default)]
pub struct DailyKeyBuilder {
    prefix: String,
}

impl DailyKeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { prefix }
    }

    fn rooted(&self, rest: String) -> String {
        if self.prefix.is_empty() {
            rest
        } else {
            format!("{}/{}", self.prefix, rest)
        }
    }
}

impl KeyBuilder for DailyKeyBuilder {
    fn checkpoint_key(&self, run_start: &DateTime<Tz>) -> String {
        let day = run_start.format("%Y-%m-%d");
        let stamp = run_start.format("%Y-%m-%d %H:%M:%S");
        self.rooted(format!("{day}/{stamp}.txt"))
    }

    fn day_prefix(&self, day: NaiveDate) -> String {
        self.rooted(format!("{}/", day.format("%Y-%m-%d")))
    }

    fn archive_key(&self, day: NaiveDate) -> String {
        self.rooted(format!("{}.zip", day.format("%Y-%m-%d")))
    }
}
