//! AckCoordinator: acknowledge a batch only once its checkpoint is durable.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::emit::checkpoint::CheckpointReceipt;
use crate::errors::ArchiverError;
use crate::ingest::{Batch, QueueClient};
use crate::types::RunOutcome;

/// How a batch was settled, and the error to surface if it was not clean.
#[derive(Debug)]
pub struct Resolution {
    pub outcome: RunOutcome,
    pub result: Result<(), ArchiverError>,
    pub ack_elapsed: Duration,
}

pub struct AckCoordinator<'a, Q: ?Sized> {
    queue: &'a Q,
}

impl<'a, Q> AckCoordinator<'a, Q>
where
    Q: QueueClient + ?Sized,
{
    pub fn new(queue: &'a Q) -> Self {
        Self { queue }
    }

    /// With a receipt, ack every handle individually and keep going past
    /// failures. Without one, ack nothing.
    pub async fn resolve(
        &self,
        batch: &Batch,
        persisted: Result<CheckpointReceipt, ArchiverError>,
    ) -> Resolution {
        let total = batch.len();
        let receipt = match persisted {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(error = %e, count = total, "checkpoint not durable; leaving batch unacknowledged");
                return Resolution {
                    outcome: RunOutcome::persist_failure(total, e.to_string()),
                    result: Err(e),
                    ack_elapsed: Duration::ZERO,
                };
            }
        };

        let started = Instant::now();
        let mut failures = Vec::new();
        for handle in batch.handles() {
            if let Err(e) = self.queue.ack(handle).await {
                warn!(error = %e, msg_id = %handle, "ack failed");
                failures.push(format!("{handle}: {e}"));
            }
        }
        let ack_elapsed = started.elapsed();
        let acked = total - failures.len();

        if failures.is_empty() {
            info!(
                acked,
                key = %receipt.key,
                ack_ms = ack_elapsed.as_millis() as u64,
                "batch acknowledged"
            );
            return Resolution {
                outcome: RunOutcome::success(total, receipt.key),
                result: Ok(()),
                ack_elapsed,
            };
        }

        let err = ArchiverError::Ack {
            failed: failures.len(),
            total,
            detail: failures.join("; "),
        };
        error!(error = %err, key = %receipt.key, "checkpoint written but acknowledgement incomplete");
        Resolution {
            outcome: RunOutcome::ack_failure(total, acked, err.to_string()),
            result: Err(err),
            ack_elapsed,
        }
    }
}
