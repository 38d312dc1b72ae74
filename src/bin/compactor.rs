//! mq-archiver: compaction entrypoint
//!
//! Zips the previous day's checkpoints (in the configured zone) into one
//! archive object. `COMPACT_DATE` re-runs a specific day.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use mq_archiver::app::{run_compaction, CompactionPlan};
use mq_archiver::config::load_config;
use mq_archiver::emit::notify::{LogNotifier, Notifier, SnsNotifier};
use mq_archiver::emit::uploader::{load_aws_config, S3ObjectStore};
use mq_archiver::emit::{DailyKeyBuilder, KeyBuilder};
use mq_archiver::secrets::{CredentialProvider, SecretsManagerProvider};
use mq_archiver::util::logging::init_logging;
use mq_archiver::util::time::{now_in, previous_day};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    info!("compactor starting");

    let cfg = load_config().context("failed to load config")?;
    let day = match cfg.compact_date {
        Some(day) => {
            info!(%day, "compacting requested date");
            day
        }
        None => previous_day(&now_in(cfg.zone()?))?,
    };

    let aws = load_aws_config(&cfg.aws_region).await;
    let secret = SecretsManagerProvider::new(aws_sdk_secretsmanager::Client::new(&aws))
        .resolve(&cfg.secret_id)
        .await
        .context("failed to resolve queue secret")?;
    let destination = secret
        .archive_bucket
        .clone()
        .context("secret has no s3Zip archive bucket")?;

    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws)).with_multipart(cfg.multipart());
    let notifier: Arc<dyn Notifier> = match &cfg.notify_topic_arn {
        Some(_) => Arc::new(SnsNotifier::new(aws_sdk_sns::Client::new(&aws))),
        None => {
            warn!("NOTIFY_TOPIC_ARN not set; status goes to the log only");
            Arc::new(LogNotifier)
        }
    };

    let keys = DailyKeyBuilder::default();
    let plan = CompactionPlan {
        source_bucket: secret.checkpoint_bucket.clone(),
        destination_bucket: destination,
        date_prefix: keys.day_prefix(day),
        archive_key: keys.archive_key(day),
        topic: cfg.notify_topic_arn.clone().unwrap_or_default(),
    };

    let response = run_compaction(&store, notifier.as_ref(), &plan).await;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
