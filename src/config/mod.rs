use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;
use dotenvy::dotenv;

use crate::emit::dlq::DeadLetterTarget;
use crate::emit::uploader::MultipartSettings;
use crate::errors::{ArchiverError, Result};
use crate::ingest::DrainSettings;
use crate::redis::DEFAULT_TLS_PORT;
use crate::transform::BatchLimits;
use crate::util::time::{parse_day, parse_zone};

pub use crate::ingest::DrainMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub secret_id: String,
    pub aws_region: String,
    pub notify_topic_arn: Option<String>,
    pub timezone: String,

    pub drain_mode: DrainMode,
    pub drain_budget_secs: u64,
    pub drain_tick_ms: u64,

    pub queue_port: u16,
    pub queue_vhost: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub queue_prefetch: usize,
    pub queue_reclaim_idle_ms: u64,

    pub dlq_exchange: String,
    pub dlq_routing_key: String,

    pub max_batch_messages: usize,
    pub max_batch_bytes: usize,

    pub multipart_threshold_bytes: usize,
    pub multipart_part_size_bytes: usize,
    pub multipart_parallel_parts: usize,

    /// Manual re-trigger of a past day's compaction.
    pub compact_date: Option<NaiveDate>,
}

pub fn load_config() -> Result<Config> {
    dotenv().ok();
    Config::from_lookup(|key| env::var(key).ok())
}

impl Config {
    /// Build from any key lookup; absent keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let cfg = Config {
            secret_id: text("SECRET_ID", "RabbitCreds"),
            aws_region: text("AWS_REGION", "ap-southeast-2"),
            notify_topic_arn: get("NOTIFY_TOPIC_ARN"),
            timezone: text("TIMEZONE", "Australia/Sydney"),

            drain_mode: parsed(&get, "DRAIN_MODE", DrainMode::Pull)?,
            drain_budget_secs: parsed(&get, "DRAIN_BUDGET_SECS", 5)?,
            drain_tick_ms: parsed(&get, "DRAIN_TICK_MS", 1000)?,

            queue_port: parsed(&get, "QUEUE_PORT", DEFAULT_TLS_PORT)?,
            queue_vhost: text("QUEUE_VHOST", "/"),
            consumer_group: text("CONSUMER_GROUP", "archivers"),
            consumer_name: text("CONSUMER_NAME", "archiver-1"),
            queue_prefetch: parsed(&get, "QUEUE_PREFETCH", 100)?,
            queue_reclaim_idle_ms: parsed(&get, "QUEUE_RECLAIM_IDLE_MS", 900_000)?,

            dlq_exchange: text("DLQ_EXCHANGE", ""),
            dlq_routing_key: text("DLQ_ROUTING_KEY", "FailMessage.Q"),

            max_batch_messages: parsed(&get, "MAX_BATCH_MESSAGES", BatchLimits::default().max_messages)?,
            max_batch_bytes: parsed(&get, "MAX_BATCH_BYTES", BatchLimits::default().max_bytes)?,

            multipart_threshold_bytes: parsed(
                &get,
                "MULTIPART_THRESHOLD_BYTES",
                MultipartSettings::default().threshold,
            )?,
            multipart_part_size_bytes: parsed(
                &get,
                "MULTIPART_PART_SIZE_BYTES",
                MultipartSettings::default().part_size,
            )?,
            multipart_parallel_parts: parsed(
                &get,
                "MULTIPART_PARALLEL_PARTS",
                MultipartSettings::default().parallel_parts,
            )?,

            compact_date: get("COMPACT_DATE").map(|d| parse_day(&d)).transpose()?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        parse_zone(&self.timezone)?;
        self.drain_settings().validate()?;
        if self.max_batch_messages == 0 || self.max_batch_bytes == 0 {
            return Err(ArchiverError::Config("batch limits must be non-zero".into()));
        }
        // S3 rejects non-final parts under 5 MiB.
        if self.multipart_part_size_bytes < 5 * 1024 * 1024 {
            return Err(ArchiverError::Config(
                "MULTIPART_PART_SIZE_BYTES must be at least 5 MiB".into(),
            ));
        }
        Ok(())
    }

    pub fn zone(&self) -> Result<Tz> {
        parse_zone(&self.timezone)
    }

    pub fn drain_settings(&self) -> DrainSettings {
        DrainSettings {
            mode: self.drain_mode,
            budget: Duration::from_secs(self.drain_budget_secs),
            tick: Duration::from_millis(self.drain_tick_ms),
            limits: BatchLimits {
                max_messages: self.max_batch_messages,
                max_bytes: self.max_batch_bytes,
            },
            dead_letter: DeadLetterTarget {
                exchange: self.dlq_exchange.clone(),
                routing_key: self.dlq_routing_key.clone(),
            },
        }
    }

    pub fn multipart(&self) -> MultipartSettings {
        MultipartSettings {
            threshold: self.multipart_threshold_bytes,
            part_size: self.multipart_part_size_bytes,
            parallel_parts: self.multipart_parallel_parts,
        }
    }

    pub fn reclaim_idle(&self) -> Duration {
        Duration::from_millis(self.queue_reclaim_idle_ms)
    }
}

fn parsed<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ArchiverError::Config(format!("{key}={raw:?}: {e}"))),
    }
}
