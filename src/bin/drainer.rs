//! mq-archiver: drain entrypoint
//!
//! Overview
//! --------
//! One scheduled run: resolve the queue secret, connect to the stream over
//! TLS, drain the queue into one checkpoint object, acknowledge what was
//! persisted, notify, exit.
//!
//! Error Model
//! -----------
//! - Configuration and credential failures are fatal before the queue is
//!   touched.
//! - A connection failure is notified, then fatal.
//! - Every other non-success outcome has already been notified by the run;
//!   the process exits non-zero so the scheduler records the failure.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::signal;
use tracing::{error, info, warn};

use mq_archiver::app::{run_drain, DrainPlan, DRAIN_OK_BODY};
use mq_archiver::config::load_config;
use mq_archiver::emit::notify::{LogNotifier, Notifier, SnsNotifier};
use mq_archiver::emit::uploader::{load_aws_config, S3ObjectStore};
use mq_archiver::emit::{DailyKeyBuilder, KeyBuilder};
use mq_archiver::redis::{ConnectionSettings, RedisStreamQueue};
use mq_archiver::secrets::{CredentialProvider, SecretsManagerProvider};
use mq_archiver::types::InvocationResponse;
use mq_archiver::util::logging::init_logging;
use mq_archiver::util::time::now_in;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    info!("drainer starting");

    let cfg = load_config().context("failed to load config")?;
    let zone = cfg.zone()?;
    let run_start = now_in(zone);

    let aws = load_aws_config(&cfg.aws_region).await;
    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws)).with_multipart(cfg.multipart());
    let topic = cfg.notify_topic_arn.clone().unwrap_or_default();
    let notifier: Arc<dyn Notifier> = match &cfg.notify_topic_arn {
        Some(_) => Arc::new(SnsNotifier::new(aws_sdk_sns::Client::new(&aws))),
        None => {
            warn!("NOTIFY_TOPIC_ARN not set; status goes to the log only");
            Arc::new(LogNotifier)
        }
    };

    let secret = SecretsManagerProvider::new(aws_sdk_secretsmanager::Client::new(&aws))
        .resolve(&cfg.secret_id)
        .await
        .context("failed to resolve queue secret")?;

    let settings = ConnectionSettings::from_secret(&secret, cfg.queue_port, &cfg.queue_vhost);
    let queue = match RedisStreamQueue::connect(
        &settings,
        &secret.queue_name,
        &cfg.consumer_group,
        &cfg.consumer_name,
    )
    .await
    {
        Ok(q) => q.with_prefetch(cfg.queue_prefetch),
        Err(e) => {
            error!(error = %e, "queue connection failed");
            notifier
                .publish(
                    &topic,
                    &format!("Error encountered while connecting to the queue\n{e}"),
                )
                .await;
            return Err(e).context("queue connection failed");
        }
    };

    match queue.reclaim_idle(cfg.reclaim_idle(), cfg.queue_prefetch).await {
        Ok(0) => {}
        Ok(n) => info!(claimed = n, "reclaimed idle pending entries"),
        Err(e) => warn!(error = %e, "reclaim of idle entries failed; continuing with own backlog"),
    }

    let plan = DrainPlan {
        drain: cfg.drain_settings(),
        bucket: secret.checkpoint_bucket.clone(),
        topic,
        checkpoint_key: DailyKeyBuilder::default().checkpoint_key(&run_start),
    };

    let result = tokio::select! {
        r = run_drain(&queue, &store, notifier.as_ref(), &plan) => r,
        _ = signal::ctrl_c() => {
            // Nothing was acked yet for any message the run had not persisted.
            bail!("interrupted before the run finished");
        }
    };

    match result {
        Ok(outcome) => {
            info!(count = outcome.processed_count, key = %plan.checkpoint_key, "drain run complete");
            let response = InvocationResponse::ok(DRAIN_OK_BODY);
            println!("{}", serde_json::to_string(&response)?);
            Ok(())
        }
        Err(failure) => {
            error!(
                status = %failure.outcome.status,
                processed = failure.outcome.processed_count,
                acked = failure.outcome.acked_count,
                "drain run failed"
            );
            Err(failure.into())
        }
    }
}
