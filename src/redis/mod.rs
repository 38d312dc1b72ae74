//! Redis Streams integration (single version of `redis` via deadpool-redis)
//!
//! A stream plus consumer group backs the `QueueClient` capability:
//! - retrieval is `XREADGROUP`, which parks entries in the group's pending
//!   list until `XACK`; nothing leaves the queue on read
//! - entries left pending by an earlier run are read back first, from a
//!   cursor over this consumer's pending list, before new entries (`>`)
//! - the message body is the `payload` field of each entry; an entry
//!   written with other fields only is delivered with its raw field list
//! - nothing is acknowledged while reading

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use deadpool_redis::redis::{self, Value};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::{ArchiverError, Result};
use crate::ingest::{Delivery, DeliveryHandle, QueueClient};
use crate::secrets::QueueSecret;
use crate::types::fp::{queue_err, with_conn};

/// Standard TLS port for managed Redis endpoints.
pub const DEFAULT_TLS_PORT: u16 = 6380;

#[derive(Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    /// `/` or empty selects db 0, `/<n>` selects db n.
    pub vhost: String,
    pub username: String,
    pub password: String,
    pub tls: bool,
}

impl ConnectionSettings {
    pub fn from_secret(secret: &QueueSecret, port: u16, vhost: &str) -> Self {
        Self {
            host: secret.host.clone(),
            port,
            vhost: vhost.to_string(),
            username: secret.username.clone(),
            password: secret.password.clone(),
            tls: true,
        }
    }

    /// Connection URL with credentials percent-encoded.
    pub fn url(&self) -> Result<String> {
        let db = vhost_db(&self.vhost)?;
        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}/{db}", self.host, self.port))
            .map_err(|e| ArchiverError::Connection(format!("host {:?}: {e}", self.host)))?;
        if !self.username.is_empty() {
            url.set_username(&self.username)
                .map_err(|_| ArchiverError::Connection("username not allowed in url".into()))?;
        }
        url.set_password(Some(&self.password))
            .map_err(|_| ArchiverError::Connection("password not allowed in url".into()))?;
        Ok(url.to_string())
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("username", &self.username)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

/// Map a vhost onto a Redis logical database index.
pub fn vhost_db(vhost: &str) -> Result<i64> {
    let trimmed = vhost.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .ok()
        .filter(|db| *db >= 0)
        .ok_or_else(|| ArchiverError::Connection(format!("vhost {vhost:?} is not a database index")))
}

#[derive(Clone)]
pub struct RedisStreamQueue {
    pool: Pool,
    stream: String,
    group: String,
    consumer: String,
    prefetch: usize,
    /// `Some(id)` while re-reading our pending list after `id`; `None` once
    /// only new entries remain.
    backlog: Arc<Mutex<Option<String>>>,
}

/// One stream entry as read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub body: EntryBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryBody {
    /// The `payload` field.
    Payload(Bytes),
    /// Written without a `payload` field: every field/value pair, in order.
    Fields(Vec<(Bytes, Bytes)>),
    /// Trimmed from the stream while still pending; the reply carries Nil.
    Deleted,
}

impl StreamEntry {
    /// `None` only for deleted entries, which have no data left to deliver.
    /// A field-only entry becomes `k1 v1 k2 v2 ...`, space separated.
    pub fn into_delivery(self) -> Option<Delivery> {
        let body = match self.body {
            EntryBody::Payload(body) => body,
            EntryBody::Fields(fields) => {
                let mut raw = Vec::new();
                for (k, v) in fields {
                    if !raw.is_empty() {
                        raw.push(b' ');
                    }
                    raw.extend_from_slice(&k);
                    raw.push(b' ');
                    raw.extend_from_slice(&v);
                }
                Bytes::from(raw)
            }
            EntryBody::Deleted => return None,
        };
        Some(Delivery {
            handle: DeliveryHandle::new(self.id),
            body,
        })
    }
}

impl RedisStreamQueue {
    pub fn new(pool: Pool, stream: &str, group: &str, consumer: &str) -> Self {
        Self {
            pool,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            prefetch: 100,
            backlog: Arc::new(Mutex::new(Some("0".to_string()))),
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Open a TLS pool, make sure the group exists.
    pub async fn connect(
        settings: &ConnectionSettings,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Self> {
        if !settings.tls {
            return Err(ArchiverError::Connection(
                "refusing to connect without TLS".into(),
            ));
        }
        let pool = Config::from_url(settings.url()?)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ArchiverError::Connection(e.to_string()))?;
        let queue = Self::new(pool, stream, group, consumer);
        queue.ensure_stream_group().await?;
        info!(host = %settings.host, port = settings.port, %stream, %group, %consumer, "queue connected");
        Ok(queue)
    }

    pub async fn ensure_stream_group(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ArchiverError::Connection(e.to_string()))?;
        let r: std::result::Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match r {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(ArchiverError::Connection(e.to_string())),
        }
    }

    /// Take over entries other consumers left pending for at least
    /// `min_idle`, so they are redrained by this consumer's backlog pass.
    /// Returns the number of entries claimed.
    #[tracing::instrument(skip(self))]
    pub async fn reclaim_idle(&self, min_idle: Duration, count: usize) -> Result<usize> {
        let mut start = "0-0".to_string();
        let mut claimed = 0usize;
        loop {
            let val: Value = with_conn(&self.pool, |mut c| {
                let start = start.clone();
                async move {
                    redis::cmd("XAUTOCLAIM")
                        .arg(&self.stream)
                        .arg(&self.group)
                        .arg(&self.consumer)
                        .arg(min_idle.as_millis() as u64)
                        .arg(&start)
                        .arg("COUNT")
                        .arg(count.max(1))
                        .arg("JUSTID")
                        .query_async(&mut c)
                        .await
                        .map_err(queue_err("XAUTOCLAIM"))
                }
            })
            .await?;

            let (next, ids) = parse_autoclaim_justid(val);
            claimed += ids.len();
            match next {
                Some(n) if n != "0-0" => start = n,
                _ => break,
            }
        }
        if claimed > 0 {
            // Claimed ids now sit in our own pending list.
            self.set_backlog(Some("0".to_string()));
            info!(claimed, "reclaimed idle pending entries");
        }
        Ok(claimed)
    }

    fn backlog_cursor(&self) -> Option<String> {
        self.backlog
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn set_backlog(&self, cursor: Option<String>) {
        *self.backlog.lock().unwrap_or_else(|p| p.into_inner()) = cursor;
    }

    async fn xreadgroup(
        &self,
        count: usize,
        block: Option<Duration>,
        from: &str,
    ) -> Result<Vec<StreamEntry>> {
        with_conn(&self.pool, |mut c| async move {
            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer)
                .arg("COUNT")
                .arg(count);
            if let Some(block) = block {
                // BLOCK 0 would wait forever.
                cmd.arg("BLOCK").arg((block.as_millis() as u64).max(1));
            }
            cmd.arg("STREAMS").arg(&self.stream).arg(from);

            let val: Value = cmd
                .query_async(&mut c)
                .await
                .map_err(queue_err("XREADGROUP"))?;
            Ok(parse_stream_entries(val))
        })
        .await
    }

    /// Pending backlog first, then new entries. An empty result means the
    /// stream had nothing left for this consumer; skipped entries never
    /// produce one.
    async fn read(&self, count: usize, block: Option<Duration>) -> Result<Vec<Delivery>> {
        while let Some(cursor) = self.backlog_cursor() {
            let entries = self.xreadgroup(count, None, &cursor).await?;
            let Some(last) = entries.last() else {
                debug!("pending backlog drained");
                self.set_backlog(None);
                break;
            };
            self.set_backlog(Some(last.id.clone()));
            let deliveries = into_deliveries(entries);
            if !deliveries.is_empty() {
                debug!(count = deliveries.len(), "redelivering pending entries");
                return Ok(deliveries);
            }
        }

        let mut block = block;
        loop {
            let entries = self.xreadgroup(count, block, ">").await?;
            if entries.is_empty() {
                return Ok(Vec::new());
            }
            let deliveries = into_deliveries(entries);
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            // Only deleted entries came back; more may follow right away.
            block = None;
        }
    }

    async fn xack(&self, id: &str) -> Result<i64> {
        with_conn(&self.pool, |mut c| async move {
            redis::cmd("XACK")
                .arg(&self.stream)
                .arg(&self.group)
                .arg(id)
                .query_async(&mut c)
                .await
                .map_err(queue_err("XACK"))
        })
        .await
    }
}

#[async_trait::async_trait]
impl QueueClient for RedisStreamQueue {
    async fn poll_once(&self) -> Result<Option<Delivery>> {
        let mut batch = self.read(1, None).await?;
        Ok(batch.pop())
    }

    async fn process_events(&self, time_limit: Duration) -> Result<Vec<Delivery>> {
        self.read(self.prefetch, Some(time_limit)).await
    }

    async fn ack(&self, handle: &DeliveryHandle) -> Result<()> {
        let acked = self.xack(handle.as_str()).await?;
        if acked == 0 {
            warn!(msg_id = %handle, "ack matched no pending entry");
        }
        Ok(())
    }

    async fn reject(&self, handle: &DeliveryHandle, requeue: bool) -> Result<()> {
        if requeue {
            debug!(msg_id = %handle, "left pending for the next run");
            return Ok(());
        }
        self.xack(handle.as_str()).await.map(|_| ())
    }

    #[tracing::instrument(skip(self, body))]
    async fn publish(&self, exchange: &str, routing_key: &str, body: &Bytes) -> Result<()> {
        with_conn(&self.pool, |mut c| async move {
            let mut x = redis::cmd("XADD");
            x.arg(routing_key).arg("*").arg("payload").arg(&body[..]);
            if !exchange.is_empty() {
                x.arg("exchange").arg(exchange);
            }
            let _: String = x.query_async(&mut c).await.map_err(queue_err("XADD"))?;
            Ok(())
        })
        .await
    }
}

/// Deleted entries stay in the pending list untouched; their data is gone.
fn into_deliveries(entries: Vec<StreamEntry>) -> Vec<Delivery> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id.clone();
            let delivery = entry.into_delivery();
            if delivery.is_none() {
                warn!(msg_id = %id, "pending entry was deleted from the stream; skipping");
            }
            delivery
        })
        .collect()
}

/// Expected shape:
/// Array[
///   Array[ stream_name, Array[ Array[ id, Array[ k1, v1, ... ] | Nil ], ... ] ],
///   ...
/// ]
pub fn parse_stream_entries(val: Value) -> Vec<StreamEntry> {
    let mut out = Vec::new();
    let Value::Bulk(streams) = val else { return out };

    for s in streams {
        let Value::Bulk(stream_pair) = s else { continue };
        if stream_pair.len() != 2 {
            continue;
        }
        let Value::Bulk(msgs) = &stream_pair[1] else { continue };

        for m in msgs {
            let Value::Bulk(pair) = m else { continue };
            if pair.len() != 2 {
                continue;
            }
            let id = match &pair[0] {
                Value::Data(b) => String::from_utf8_lossy(b).to_string(),
                _ => continue,
            };
            let body = match &pair[1] {
                Value::Bulk(kv) => entry_body(kv),
                _ => EntryBody::Deleted,
            };
            out.push(StreamEntry { id, body });
        }
    }

    out
}

fn entry_body(kv: &[Value]) -> EntryBody {
    let mut fields: Vec<(Bytes, Bytes)> = kv
        .chunks_exact(2)
        .filter_map(|pair| match (&pair[0], &pair[1]) {
            (Value::Data(k), Value::Data(v)) => {
                Some((Bytes::from(k.clone()), Bytes::from(v.clone())))
            }
            _ => None,
        })
        .collect();
    match fields.iter().position(|(k, _)| &k[..] == b"payload") {
        Some(i) => EntryBody::Payload(fields.swap_remove(i).1),
        None => EntryBody::Fields(fields),
    }
}

/// `XAUTOCLAIM .. JUSTID` reply: `[next_start, [id, ...], (deleted ids)]`.
fn parse_autoclaim_justid(val: Value) -> (Option<String>, Vec<String>) {
    let Value::Bulk(parts) = val else {
        return (None, Vec::new());
    };
    let next = match parts.first() {
        Some(Value::Data(b)) => Some(String::from_utf8_lossy(b).to_string()),
        Some(Value::Status(s)) => Some(s.clone()),
        _ => None,
    };
    let ids = match parts.get(1) {
        Some(Value::Bulk(ids)) => ids
            .iter()
            .filter_map(|v| match v {
                Value::Data(b) => Some(String::from_utf8_lossy(b).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    (next, ids)
}
