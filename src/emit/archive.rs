//! ArchiveCompactor: fold one day's checkpoints into a single zip.
//!
//! Everything is built in memory; a failure at any fetch, compress or
//! upload step aborts the day and nothing partial is uploaded.

use std::io::{Cursor, Write};

use bytes::Bytes;
use tracing::{debug, info};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::emit::ObjectStore;
use crate::errors::ArchiverError;

/// What a successful compaction put into its archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveManifest {
    pub date_prefix: String,
    pub archive_key: String,
    /// Source checkpoint keys, in entry order.
    pub keys: Vec<String>,
    pub archive_bytes: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Archive {
    pub entries: Vec<(String, Bytes)>,
}

impl Archive {
    pub fn add_entry(&mut self, name: impl Into<String>, content: Bytes) {
        self.entries.push((name.into(), content));
    }

    /// Deflate every entry into a zip, in insertion order.
    pub fn to_zip(&self) -> Result<Vec<u8>, ArchiverError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        for (name, content) in &self.entries {
            zip.start_file(name.as_str(), options)
                .map_err(|e| ArchiverError::Compaction(format!("zip entry {name}: {e}")))?;
            zip.write_all(content)
                .map_err(|e| ArchiverError::Compaction(format!("zip write {name}: {e}")))?;
        }
        let cursor = zip
            .finish()
            .map_err(|e| ArchiverError::Compaction(format!("zip finish: {e}")))?;
        Ok(cursor.into_inner())
    }
}

/// Entry name for an object key: the text after the last `/`.
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[derive(Clone, Debug)]
pub struct ArchiveCompactor {
    pub source_bucket: String,
    pub destination_bucket: String,
}

impl ArchiveCompactor {
    pub fn new(source_bucket: impl Into<String>, destination_bucket: impl Into<String>) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            destination_bucket: destination_bucket.into(),
        }
    }

    /// `Ok(None)` when nothing exists under `date_prefix`; no upload happens.
    #[tracing::instrument(skip(self, store), fields(source = %self.source_bucket, destination = %self.destination_bucket))]
    pub async fn compact<S>(
        &self,
        store: &S,
        date_prefix: &str,
        archive_key: &str,
    ) -> Result<Option<ArchiveManifest>, ArchiverError>
    where
        S: ObjectStore + ?Sized,
    {
        let listed = store
            .list(&self.source_bucket, date_prefix)
            .await
            .map_err(|e| ArchiverError::Compaction(format!("list {date_prefix}: {e}")))?;

        // Folder placeholder objects have no base name and carry no data.
        let keys: Vec<String> = listed
            .into_iter()
            .filter(|k| !base_name(k).is_empty())
            .collect();
        if keys.is_empty() {
            info!("no objects found for this date");
            return Ok(None);
        }

        let mut archive = Archive::default();
        for key in &keys {
            let content = store
                .get(&self.source_bucket, key)
                .await
                .map_err(|e| ArchiverError::Compaction(format!("fetch {key}: {e}")))?;
            debug!(%key, bytes = content.len(), "adding checkpoint to archive");
            archive.add_entry(base_name(key), content);
        }

        let zipped = archive.to_zip()?;
        let archive_bytes = zipped.len();
        store
            .put(&self.destination_bucket, archive_key, Bytes::from(zipped))
            .await
            .map_err(|e| ArchiverError::Compaction(format!("upload {archive_key}: {e}")))?;

        info!(entries = keys.len(), archive_bytes, %archive_key, "archive uploaded");
        Ok(Some(ArchiveManifest {
            date_prefix: date_prefix.to_string(),
            archive_key: archive_key.to_string(),
            keys,
            archive_bytes,
        }))
    }
}
