//! App runtime: one drain run and one compaction run.
//!
//! A drain run is strictly sequential: drain, write the checkpoint, settle
//! acknowledgements, notify. Collaborators are injected so tests can swap in
//! fakes.

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info};

use crate::emit::checkpoint::{Checkpoint, CheckpointWriter};
use crate::emit::notify::Notifier;
use crate::emit::ObjectStore;
use crate::errors::ArchiverError;
use crate::ingest::{self, DrainSettings, QueueClient};
use crate::types::RunOutcome;

pub mod ack;
pub mod compact;

pub use ack::{AckCoordinator, Resolution};
pub use compact::{run_compaction, CompactionPlan};

pub const DRAIN_OK_BODY: &str = "Messages uploaded to object storage";

/// Everything one drain run needs besides its collaborators.
#[derive(Clone, Debug)]
pub struct DrainPlan {
    pub drain: DrainSettings,
    pub bucket: String,
    pub topic: String,
    pub checkpoint_key: String,
}

/// A run that did not end in success. The outcome has already been
/// notified.
#[derive(Debug, Error)]
#[error("{} run: {source}", .outcome.status)]
pub struct RunFailure {
    pub outcome: RunOutcome,
    #[source]
    pub source: ArchiverError,
}

#[tracing::instrument(skip_all, fields(bucket = %plan.bucket, key = %plan.checkpoint_key))]
pub async fn run_drain<Q, S, N>(
    queue: &Q,
    store: &S,
    notifier: &N,
    plan: &DrainPlan,
) -> Result<RunOutcome, RunFailure>
where
    Q: QueueClient + ?Sized,
    S: ObjectStore + ?Sized,
    N: Notifier + ?Sized,
{
    let started = Instant::now();

    let batch = match ingest::drain(queue, &plan.drain).await {
        Ok(batch) => batch,
        Err(source) => {
            error!(error = %source, "drain failed");
            notifier.publish(&plan.topic, &drain_failure_text(&source)).await;
            return Err(RunFailure {
                outcome: RunOutcome::drain_failure(source.to_string()),
                source,
            });
        }
    };
    let drain_elapsed = started.elapsed();

    let checkpoint = Checkpoint {
        key: plan.checkpoint_key.clone(),
        content: batch.buffer().serialize(),
    };
    let persisted = CheckpointWriter::new(store, &plan.bucket)
        .write(&checkpoint)
        .await;

    let Resolution {
        outcome,
        result,
        ack_elapsed,
    } = AckCoordinator::new(queue).resolve(&batch, persisted).await;

    match result {
        Ok(()) => {
            info!(
                count = outcome.processed_count,
                drain_ms = drain_elapsed.as_millis() as u64,
                ack_ms = ack_elapsed.as_millis() as u64,
                "run succeeded"
            );
            let text = success_text(outcome.acked_count, ack_elapsed.as_secs_f64());
            notifier.publish(&plan.topic, &text).await;
            Ok(outcome)
        }
        Err(source) => {
            let text = match &source {
                ArchiverError::Ack { failed, total, .. } => {
                    ack_failure_text(&plan.checkpoint_key, *failed, *total, &source)
                }
                _ => persist_failure_text(&source),
            };
            notifier.publish(&plan.topic, &text).await;
            Err(RunFailure { outcome, source })
        }
    }
}

pub fn success_text(acked: usize, ack_secs: f64) -> String {
    format!(
        "Messages have been consumed from the queue and uploaded to object storage successfully. \
         Total time to ack {acked} is {ack_secs:.3}s"
    )
}

pub fn persist_failure_text(err: &ArchiverError) -> String {
    format!(
        "Error encountered while uploading messages to object storage. Check the checkpoint \
         bucket for the txt file and the queue for unacknowledged messages\n{err}"
    )
}

pub fn drain_failure_text(err: &ArchiverError) -> String {
    format!(
        "Error encountered while reading messages from the queue. Check worker memory size \
         and the error below\n{err}"
    )
}

pub fn ack_failure_text(key: &str, failed: usize, total: usize, err: &ArchiverError) -> String {
    format!(
        "Checkpoint {key} was written but {failed} of {total} acknowledgements failed; \
         those messages will be redelivered\n{err}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_text_reports_count_and_seconds() {
        let text = success_text(3, 0.25);
        assert!(text.starts_with("Messages have been consumed from the queue"));
        assert!(text.ends_with("Total time to ack 3 is 0.250s"));
    }

    #[test]
    fn failure_texts_carry_the_error() {
        let err = ArchiverError::Drain("connection reset".into());
        assert!(drain_failure_text(&err).ends_with("\nDrain error: connection reset"));

        let err = ArchiverError::Ack {
            failed: 1,
            total: 3,
            detail: "1-0: broken pipe".into(),
        };
        let text = ack_failure_text("2024-05-01/2024-05-01 10:00:00.txt", 1, 3, &err);
        assert!(text.starts_with("Checkpoint 2024-05-01/2024-05-01 10:00:00.txt was written but 1 of 3"));
        assert!(text.contains("broken pipe"));
    }

    #[test]
    fn run_failure_names_status() {
        let failure = RunFailure {
            outcome: RunOutcome::drain_failure("x"),
            source: ArchiverError::Drain("x".into()),
        };
        assert_eq!(failure.to_string(), "drain failure run: Drain error: x");
    }
}
