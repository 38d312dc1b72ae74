//! QueueDrainer: fill one [`Batch`] from the queue without acknowledging
//! anything.
//!
//! Two strategies:
//! - `Pull` polls one message at a time until the queue reports empty. Every
//!   retrieved body goes into the batch (lossy UTF-8), nothing is rejected.
//! - `Push` pumps delivery events in short ticks until a wall-clock budget
//!   elapses. Bodies must be valid UTF-8; anything else is forwarded to the
//!   dead-letter target and left out of the batch.
//!
//! Both stop early once the batch is full. Deliveries already retrieved at
//! that point are rejected with requeue so the next run picks them up.

use std::str::FromStr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::emit::dlq::{self, DeadLetterTarget};
use crate::errors::{ArchiverError, Result};
use crate::ingest::{Batch, Delivery, QueueClient};
use crate::transform::decode::{decode_body, decode_body_lossy};
use crate::transform::BatchLimits;

pub const MAX_PUSH_BUDGET: Duration = Duration::from_secs(900);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrainMode {
    #[default]
    Pull,
    Push,
}

impl FromStr for DrainMode {
    type Err = ArchiverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" | "greedy" => Ok(DrainMode::Pull),
            "push" | "timeboxed" => Ok(DrainMode::Push),
            other => Err(ArchiverError::Config(format!(
                "DRAIN_MODE must be pull or push, got {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DrainSettings {
    pub mode: DrainMode,
    /// Push mode only: total time spent pumping events.
    pub budget: Duration,
    /// Push mode only: length of one event-pump tick.
    pub tick: Duration,
    pub limits: BatchLimits,
    pub dead_letter: DeadLetterTarget,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            mode: DrainMode::Pull,
            budget: Duration::from_secs(5),
            tick: Duration::from_secs(1),
            limits: BatchLimits::default(),
            dead_letter: DeadLetterTarget::default(),
        }
    }
}

impl DrainSettings {
    pub fn validate(&self) -> Result<()> {
        if self.mode == DrainMode::Push
            && (self.budget < Duration::from_secs(1) || self.budget > MAX_PUSH_BUDGET)
        {
            return Err(ArchiverError::Config(format!(
                "push budget must be 1..=900 seconds, got {:?}",
                self.budget
            )));
        }
        if self.tick.is_zero() || self.tick > Duration::from_secs(1) {
            return Err(ArchiverError::Config(format!(
                "drain tick must be 1..=1000 ms, got {:?}",
                self.tick
            )));
        }
        Ok(())
    }
}

/// Drain per `settings`. Any retrieval failure aborts the drain as
/// `ArchiverError::Drain`; messages already retrieved stay unacknowledged.
pub async fn drain<Q>(queue: &Q, settings: &DrainSettings) -> Result<Batch>
where
    Q: QueueClient + ?Sized,
{
    let started = Instant::now();
    let batch = match settings.mode {
        DrainMode::Pull => drain_pull(queue, settings).await?,
        DrainMode::Push => drain_push(queue, settings).await?,
    };
    info!(
        mode = ?settings.mode,
        count = batch.len(),
        dead_lettered = batch.dead_lettered(),
        deferred = batch.deferred(),
        bytes = batch.buffer().byte_len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "drain finished"
    );
    Ok(batch)
}

async fn drain_pull<Q>(queue: &Q, settings: &DrainSettings) -> Result<Batch>
where
    Q: QueueClient + ?Sized,
{
    let mut batch = Batch::new(settings.limits);
    while !batch.is_full() {
        let Some(delivery) = queue.poll_once().await.map_err(as_drain)? else {
            debug!("no messages on queue");
            break;
        };
        let text = decode_body_lossy(&delivery.body);
        if batch.push(delivery.handle.clone(), &text).is_err() {
            defer(queue, &mut batch, &delivery).await?;
            break;
        }
    }
    Ok(batch)
}

async fn drain_push<Q>(queue: &Q, settings: &DrainSettings) -> Result<Batch>
where
    Q: QueueClient + ?Sized,
{
    let mut batch = Batch::new(settings.limits);
    let deadline = Instant::now() + settings.budget;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let deliveries = queue
            .process_events(settings.tick.min(remaining))
            .await
            .map_err(as_drain)?;
        for delivery in deliveries {
            on_message(queue, settings, &mut batch, delivery).await?;
        }
        if batch.deferred() > 0 {
            info!(count = batch.len(), "batch full; leaving the rest for the next run");
            break;
        }
    }
    Ok(batch)
}

async fn on_message<Q>(
    queue: &Q,
    settings: &DrainSettings,
    batch: &mut Batch,
    delivery: Delivery,
) -> Result<()>
where
    Q: QueueClient + ?Sized,
{
    if batch.deferred() > 0 || batch.is_full() {
        return defer(queue, batch, &delivery).await;
    }

    match decode_body(&delivery.body) {
        Ok(text) => {
            if batch.push(delivery.handle.clone(), &text).is_err() {
                defer(queue, batch, &delivery).await?;
            }
        }
        Err(e) => {
            warn!(
                error = %e,
                msg_id = %delivery.handle,
                payload_hex = hex::encode(&delivery.body),
                "failed to decode message body"
            );
            dlq::forward(queue, &settings.dead_letter, &delivery, "decode_error")
                .await
                .map_err(as_drain)?;
            batch.record_dead_letter();
        }
    }
    Ok(())
}

async fn defer<Q>(queue: &Q, batch: &mut Batch, delivery: &Delivery) -> Result<()>
where
    Q: QueueClient + ?Sized,
{
    queue
        .reject(&delivery.handle, true)
        .await
        .map_err(as_drain)?;
    batch.record_deferred();
    Ok(())
}

fn as_drain(e: ArchiverError) -> ArchiverError {
    match e {
        ArchiverError::Drain(_) => e,
        other => ArchiverError::Drain(other.to_string()),
    }
}
