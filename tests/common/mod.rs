#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use mq_archiver::emit::notify::Notifier;
use mq_archiver::emit::ObjectStore;
use mq_archiver::errors::{ArchiverError, Result, StoreError};
use mq_archiver::ingest::{Delivery, DeliveryHandle, QueueClient};

/// Cross-fake record of calls, in the order they happened.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

/// ---- Queue -----

#[derive(Clone, Default)]
pub struct FakeQueue {
    pub log: CallLog,
    /// Served one at a time by `poll_once`.
    ready: Arc<Mutex<VecDeque<Delivery>>>,
    /// One entry per `process_events` tick.
    ticks: Arc<Mutex<VecDeque<Vec<Delivery>>>>,
    /// `poll_once` fails once this many deliveries have been served.
    fail_poll_after: Arc<Mutex<Option<usize>>>,
    served: Arc<Mutex<usize>>,
    fail_ack: Arc<Mutex<HashSet<String>>>,
    pub acked: Arc<Mutex<Vec<String>>>,
    pub rejected: Arc<Mutex<Vec<(String, bool)>>>,
    pub published: Arc<Mutex<Vec<(String, String, Bytes)>>>,
}

impl FakeQueue {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn enqueue(&self, id: &str, body: &[u8]) {
        self.ready
            .lock()
            .unwrap()
            .push_back(Delivery::new(id, Bytes::copy_from_slice(body)));
    }

    pub fn tick(&self, deliveries: &[(&str, &[u8])]) {
        let batch = deliveries
            .iter()
            .map(|(id, body)| Delivery::new(*id, Bytes::copy_from_slice(body)))
            .collect();
        self.ticks.lock().unwrap().push_back(batch);
    }

    pub fn fail_poll_after(&self, served: usize) {
        *self.fail_poll_after.lock().unwrap() = Some(served);
    }

    pub fn fail_ack(&self, id: &str) {
        self.fail_ack.lock().unwrap().insert(id.to_string());
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn rejected(&self) -> Vec<(String, bool)> {
        self.rejected.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, String, Bytes)> {
        self.published.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.ready.lock().unwrap().len()
    }
}

#[async_trait]
impl QueueClient for FakeQueue {
    async fn poll_once(&self) -> Result<Option<Delivery>> {
        let mut served = self.served.lock().unwrap();
        if let Some(limit) = *self.fail_poll_after.lock().unwrap() {
            if *served >= limit {
                return Err(ArchiverError::Queue("connection reset by peer".into()));
            }
        }
        let next = self.ready.lock().unwrap().pop_front();
        if let Some(d) = &next {
            *served += 1;
            self.log.push(format!("poll:{}", d.handle));
        }
        Ok(next)
    }

    async fn process_events(&self, time_limit: Duration) -> Result<Vec<Delivery>> {
        let next = self.ticks.lock().unwrap().pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(time_limit).await;
                Ok(Vec::new())
            }
        }
    }

    async fn ack(&self, handle: &DeliveryHandle) -> Result<()> {
        if self.fail_ack.lock().unwrap().contains(handle.as_str()) {
            self.log.push(format!("ack-failed:{handle}"));
            return Err(ArchiverError::Queue(format!("XACK {handle}: broken pipe")));
        }
        self.log.push(format!("ack:{handle}"));
        self.acked.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn reject(&self, handle: &DeliveryHandle, requeue: bool) -> Result<()> {
        self.log.push(format!("reject:{handle}:{requeue}"));
        self.rejected
            .lock()
            .unwrap()
            .push((handle.to_string(), requeue));
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &Bytes) -> Result<()> {
        self.log.push(format!("publish:{routing_key}"));
        self.published
            .lock()
            .unwrap()
            .push((exchange.to_string(), routing_key.to_string(), body.clone()));
        Ok(())
    }
}

/// ---- Object store -----

#[derive(Clone, Default)]
pub struct FakeStore {
    pub log: CallLog,
    objects: Arc<Mutex<BTreeMap<(String, String), Bytes>>>,
    fail_put: Arc<Mutex<bool>>,
    fail_get: Arc<Mutex<Option<String>>>,
}

impl FakeStore {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn insert(&self, bucket: &str, key: &str, content: &[u8]) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            Bytes::copy_from_slice(content),
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn fail_puts(&self) {
        *self.fail_put.lock().unwrap() = true;
    }

    /// Reads of `key` fail with a backend error.
    pub fn fail_get(&self, key: &str) {
        *self.fail_get.lock().unwrap() = Some(key.to_string());
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get(&self, bucket: &str, key: &str) -> std::result::Result<Bytes, StoreError> {
        if self.fail_get.lock().unwrap().as_deref() == Some(key) {
            return Err(StoreError::Backend("read timed out".into()));
        }
        self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put(&self, bucket: &str, key: &str, blob: Bytes) -> std::result::Result<(), StoreError> {
        if *self.fail_put.lock().unwrap() {
            self.log.push(format!("put-failed:{bucket}/{key}"));
            return Err(StoreError::Backend("AccessDenied: bucket policy".into()));
        }
        self.log.push(format!("put:{bucket}/{key}"));
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), blob);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> std::result::Result<Vec<String>, StoreError> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

/// ---- Notifier -----

#[derive(Clone, Default)]
pub struct FakeNotifier {
    pub log: CallLog,
    pub messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeNotifier {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn publish(&self, topic: &str, message: &str) {
        self.log.push("notify");
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), message.to_string()));
    }
}

/// Queue, store and notifier sharing one call log.
pub fn harness() -> (CallLog, FakeQueue, FakeStore, FakeNotifier) {
    let log = CallLog::default();
    (
        log.clone(),
        FakeQueue::with_log(log.clone()),
        FakeStore::with_log(log.clone()),
        FakeNotifier::with_log(log),
    )
}
