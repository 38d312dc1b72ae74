//! S3 client utilities: the production `ObjectStore`, single-put and
//! multipart uploads.

use std::sync::Arc;

use anyhow::Result;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;

use crate::emit::ObjectStore;
use crate::errors::StoreError;

/// Shared AWS configuration for every client the binaries build.
pub async fn load_aws_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .load()
        .await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultipartSettings {
    /// Objects at or above this size go through multipart upload.
    pub threshold: usize,
    /// Size of each part (S3 minimum is 5 MiB except for the last part).
    pub part_size: usize,
    /// Number of parts uploaded concurrently.
    pub parallel_parts: usize,
}

impl Default for MultipartSettings {
    fn default() -> Self {
        Self {
            threshold: 64 * 1024 * 1024,
            part_size: 16 * 1024 * 1024,
            parallel_parts: 4,
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    multipart: MultipartSettings,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            multipart: MultipartSettings::default(),
        }
    }

    pub fn with_multipart(mut self, multipart: MultipartSettings) -> Self {
        self.multipart = multipart;
        self
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let svc = e.into_service_error();
                if svc.is_no_such_key() {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Backend(format!("get_object: {}", DisplayErrorContext(&svc)))
                }
            })?;
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(format!("get_object body: {e}")))?;
        Ok(body.into_bytes())
    }

    #[tracing::instrument(skip(self, blob), fields(bytes = blob.len()))]
    async fn put(&self, bucket: &str, key: &str, blob: Bytes) -> Result<(), StoreError> {
        let res = if blob.len() >= self.multipart.threshold {
            let parts = split_parts(&blob, self.multipart.part_size);
            multipart_upload(
                &self.client,
                bucket,
                key,
                parts,
                self.multipart.parallel_parts,
                None,
            )
            .await
        } else {
            upload_bytes_to_s3(&self.client, bucket, key, blob, Some(content_type_for(key))).await
        };
        res.map_err(|e| StoreError::Backend(format!("{e:#}")))
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| {
                    StoreError::Backend(format!("list_objects_v2: {}", DisplayErrorContext(&e)))
                })?;
            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_owned)));
            match page.next_continuation_token() {
                Some(next) if page.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_owned())
                }
                _ => break,
            }
        }
        debug!(count = keys.len(), "listed objects");
        Ok(keys)
    }
}

fn content_type_for(key: &str) -> &'static str {
    if key.ends_with(".zip") {
        "application/zip"
    } else {
        "text/plain; charset=utf-8"
    }
}

/// Simple single-object PUT (small payloads).
pub async fn upload_bytes_to_s3(
    client: &Client,
    bucket: &str,
    key: &str,
    data: Bytes,
    content_type: Option<&str>,
) -> Result<()> {
    let len = data.len() as i64;
    let mut req = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .content_length(len)
        .body(ByteStream::from(data));

    if let Some(ct) = content_type {
        req = req.content_type(ct);
    }

    req.send().await.map_err(|e| anyhow::anyhow!("put_object: {}", DisplayErrorContext(&e)))?;
    Ok(())
}

/// Multipart upload of pre-chunked parts with bounded parallelism.
/// - `parts`: vector of (part_number, part_bytes).
/// - `parallel_parts`: degree of parallelism for uploading parts.
/// - `content_type`: set as object metadata (multipart doesn’t set per-part content-type).
pub async fn multipart_upload(
    client: &Client,
    bucket: &str,
    key: &str,
    parts: Vec<(i32, Bytes)>,
    parallel_parts: usize,
    content_type: Option<&str>,
) -> Result<()> {
    // 1) Initiate multipart, attach object metadata here
    let init = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .content_type(content_type.unwrap_or_else(|| content_type_for(key)))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("create_multipart_upload: {}", DisplayErrorContext(&e)))?;
    let upload_id = Arc::new(init.upload_id().unwrap_or_default().to_string());

    // 2) Upload parts in parallel; every task clones its own upload id
    let completed_parts: Result<Vec<CompletedPart>> = {
        let futs = parts.into_iter().map(|(part_number, buf)| {
            let client = client.clone();
            let bucket = bucket.to_string();
            let key = key.to_string();
            let upload_id = upload_id.clone();

            async move {
                let len = buf.len() as i64;
                let etag = client
                    .upload_part()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(upload_id.as_str())
                    .part_number(part_number)
                    .content_length(len)
                    .body(ByteStream::from(buf))
                    .send()
                    .await
                    .map_err(|e| {
                        anyhow::anyhow!("upload_part {part_number}: {}", DisplayErrorContext(&e))
                    })?
                    .e_tag()
                    .unwrap_or_default()
                    .to_string();

                Ok::<_, anyhow::Error>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .e_tag(etag)
                        .build(),
                )
            }
        });

        let mut stream = tokio_stream::iter(futs).buffer_unordered(parallel_parts.max(1));
        let mut acc = Vec::new();
        let mut failed = None;
        while let Some(res) = stream.next().await {
            match res {
                Ok(part) => acc.push(part),
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }
        match failed {
            Some(e) => Err(e),
            None => {
                acc.sort_by_key(|p| p.part_number().unwrap_or_default());
                Ok(acc)
            }
        }
    };

    // 3) Complete or abort
    match completed_parts {
        Ok(parts) => {
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build();

            client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id.as_str())
                .multipart_upload(completed)
                .send()
                .await
                .map_err(|e| {
                    anyhow::anyhow!("complete_multipart_upload: {}", DisplayErrorContext(&e))
                })?;
            Ok(())
        }
        Err(e) => {
            let _ = client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id.as_str())
                .send()
                .await;
            Err(e)
        }
    }
}

/// Split `buf` into 1-based numbered parts of at most `part_size` bytes.
/// Parts share the original allocation.
pub fn split_parts(buf: &Bytes, part_size: usize) -> Vec<(i32, Bytes)> {
    let part_size = part_size.max(1);
    let mut out = Vec::new();
    let mut idx: i32 = 1;
    let mut start = 0usize;
    while start < buf.len() {
        let end = (start + part_size).min(buf.len());
        out.push((idx, buf.slice(start..end)));
        idx += 1;
        start = end;
    }
    out
}
