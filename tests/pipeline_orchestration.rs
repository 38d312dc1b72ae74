mod common;

use common::{harness, FakeQueue};
use mq_archiver::app::{run_drain, DrainPlan};
use mq_archiver::errors::ArchiverError;
use mq_archiver::ingest::DrainSettings;
use mq_archiver::types::RunStatus;

const BUCKET: &str = "incident-text";
const KEY: &str = "2024-05-01/2024-05-01 10:15:00.txt";

fn plan() -> DrainPlan {
    DrainPlan {
        drain: DrainSettings::default(),
        bucket: BUCKET.into(),
        topic: "arn:aws:sns:ap-southeast-2:000000000000:archiver".into(),
        checkpoint_key: KEY.into(),
    }
}

fn seed(queue: &FakeQueue, bodies: &[&str]) {
    for (i, body) in bodies.iter().enumerate() {
        queue.enqueue(&format!("{}-0", i + 1), body.as_bytes());
    }
}

#[tokio::test]
async fn three_messages_end_to_end() {
    let (_log, queue, store, notifier) = harness();
    seed(&queue, &["m1", "m2", "m3"]);

    let outcome = run_drain(&queue, &store, &notifier, &plan()).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.processed_count, 3);
    assert_eq!(store.object(BUCKET, KEY).unwrap(), "m1\nm2\nm3\n");
    assert_eq!(queue.acked(), vec!["1-0", "2-0", "3-0"]);

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with(
        "Messages have been consumed from the queue and uploaded to object storage successfully."
    ));
    assert!(messages[0].contains("Total time to ack 3 is"));
}

#[tokio::test]
async fn acks_follow_the_checkpoint_write() {
    let (log, queue, store, notifier) = harness();
    seed(&queue, &["a", "b"]);

    run_drain(&queue, &store, &notifier, &plan()).await.unwrap();

    let put = log.position("put:").expect("checkpoint written");
    let first_ack = log.position("ack:").expect("messages acked");
    assert!(put < first_ack, "ack before persist: {:?}", log.entries());
    assert_eq!(log.entries().last().map(String::as_str), Some("notify"));
}

#[tokio::test]
async fn failed_write_acks_nothing() {
    let (log, queue, store, notifier) = harness();
    seed(&queue, &["m1", "m2"]);
    store.fail_puts();

    let failure = run_drain(&queue, &store, &notifier, &plan()).await.unwrap_err();

    assert_eq!(failure.outcome.status, RunStatus::PersistFailure);
    assert_eq!(failure.outcome.processed_count, 2);
    assert_eq!(failure.outcome.acked_count, 0);
    assert!(matches!(failure.source, ArchiverError::Persist { .. }));
    assert!(queue.acked().is_empty());
    assert!(log.position("ack").is_none());

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Error encountered while uploading messages to object storage."));
    assert!(messages[0].contains("AccessDenied: bucket policy"));
}

#[tokio::test]
async fn unreadable_existing_checkpoint_is_a_persist_failure() {
    let (_log, queue, store, notifier) = harness();
    seed(&queue, &["m1"]);
    store.insert(BUCKET, KEY, b"earlier\n");
    store.fail_get(KEY);

    let failure = run_drain(&queue, &store, &notifier, &plan()).await.unwrap_err();

    assert_eq!(failure.outcome.status, RunStatus::PersistFailure);
    assert!(queue.acked().is_empty());
    assert_eq!(store.object(BUCKET, KEY).unwrap(), "earlier\n");
}

#[tokio::test]
async fn partial_ack_failure_is_reported() {
    let (_log, queue, store, notifier) = harness();
    seed(&queue, &["m1", "m2", "m3"]);
    queue.fail_ack("2-0");

    let failure = run_drain(&queue, &store, &notifier, &plan()).await.unwrap_err();

    assert_eq!(failure.outcome.status, RunStatus::AckFailure);
    assert_eq!(failure.outcome.processed_count, 3);
    assert_eq!(failure.outcome.acked_count, 2);
    assert_eq!(queue.acked(), vec!["1-0", "3-0"]);
    assert!(matches!(
        failure.source,
        ArchiverError::Ack { failed: 1, total: 3, .. }
    ));
    // The checkpoint stays; the unacked message will show up again later.
    assert_eq!(store.object(BUCKET, KEY).unwrap(), "m1\nm2\nm3\n");

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with(&format!("Checkpoint {KEY} was written but 1 of 3")));
}

#[tokio::test]
async fn drain_failure_writes_and_acks_nothing() {
    let (log, queue, store, notifier) = harness();
    seed(&queue, &["m1", "m2", "m3"]);
    queue.fail_poll_after(1);

    let failure = run_drain(&queue, &store, &notifier, &plan()).await.unwrap_err();

    assert_eq!(failure.outcome.status, RunStatus::DrainFailure);
    assert!(matches!(failure.source, ArchiverError::Drain(_)));
    assert!(store.keys(BUCKET).is_empty());
    assert!(log.position("ack").is_none());

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Error encountered while reading messages from the queue."));
    assert!(messages[0].contains("connection reset by peer"));
}

#[tokio::test]
async fn empty_queue_writes_an_empty_checkpoint() {
    let (_log, queue, store, notifier) = harness();

    let outcome = run_drain(&queue, &store, &notifier, &plan()).await.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.processed_count, 0);
    assert_eq!(store.object(BUCKET, KEY).unwrap(), "");
    assert!(queue.acked().is_empty());
    assert!(notifier.messages()[0].contains("Total time to ack 0 is"));
}

#[tokio::test]
async fn redelivered_messages_are_archived_again() {
    let (_log, queue, store, notifier) = harness();
    seed(&queue, &["m1", "m2"]);
    queue.fail_ack("2-0");
    let _ = run_drain(&queue, &store, &notifier, &plan()).await;

    // Broker redelivers the unacked message on the next run.
    let (_log2, queue2, _, _) = harness();
    queue2.enqueue("2-0", b"m2");
    let second = DrainPlan {
        checkpoint_key: "2024-05-01/2024-05-01 10:20:00.txt".into(),
        ..plan()
    };
    run_drain(&queue2, &store, &notifier, &second).await.unwrap();

    assert_eq!(store.object(BUCKET, KEY).unwrap(), "m1\nm2\n");
    assert_eq!(store.object(BUCKET, &second.checkpoint_key).unwrap(), "m2\n");
}
