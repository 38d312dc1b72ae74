use crate::errors::ArchiverError;
use crate::ingest::{Delivery, QueueClient};
use tracing::info;

/// Where undecodable messages are forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterTarget {
    pub exchange: String,
    pub routing_key: String,
}

impl Default for DeadLetterTarget {
    fn default() -> Self {
        Self {
            exchange: String::new(),
            routing_key: "FailMessage.Q".into(),
        }
    }
}

/// Copy the raw body to the dead-letter target, then drop the original
/// from the queue. Publishing first means a failed reject only produces a
/// duplicate in the dead-letter queue, never a lost message.
#[tracing::instrument(skip(queue, delivery), fields(msg_id = %delivery.handle))]
pub async fn forward<Q>(
    queue: &Q,
    target: &DeadLetterTarget,
    delivery: &Delivery,
    reason: &str,
) -> Result<(), ArchiverError>
where
    Q: QueueClient + ?Sized,
{
    queue
        .publish(&target.exchange, &target.routing_key, &delivery.body)
        .await?;
    queue.reject(&delivery.handle, false).await?;
    info!(routing_key = %target.routing_key, reason = %reason, "published to dlq");
    Ok(())
}
