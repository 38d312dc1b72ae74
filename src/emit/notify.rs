//! Best-effort status notifications.
//!
//! `publish` never fails from the caller's point of view: there is no
//! secondary channel, so implementations log delivery errors and move on.

use aws_sdk_sns::error::DisplayErrorContext;
use aws_sdk_sns::Client as SnsClient;
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, message: &str);
}

/// Fan-out via an SNS topic ARN.
#[derive(Clone)]
pub struct SnsNotifier {
    client: SnsClient,
}

impl SnsNotifier {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Notifier for SnsNotifier {
    #[tracing::instrument(skip(self, message))]
    async fn publish(&self, topic: &str, message: &str) {
        match self
            .client
            .publish()
            .topic_arn(topic)
            .message(message)
            .send()
            .await
        {
            Ok(out) => info!(message_id = out.message_id().unwrap_or_default(), "notification sent"),
            Err(e) => warn!(error = %DisplayErrorContext(&e), "notification failed"),
        }
    }
}

/// Used when no topic is configured: the status only reaches the logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, topic: &str, message: &str) {
        info!(topic = %topic, %message, "status");
    }
}
