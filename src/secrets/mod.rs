//! Connection secrets, resolved once per run before the queue is touched.
//!
//! The stored secret is a JSON object:
//! `{"hostname", "queuename", "ruser", "rpassword", "s3Txt", "s3Zip"}`.

use std::fmt;

use aws_sdk_secretsmanager::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use tracing::info;

use crate::errors::CredentialError;

#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct QueueSecret {
    #[serde(rename = "hostname")]
    pub host: String,
    #[serde(rename = "queuename")]
    pub queue_name: String,
    #[serde(rename = "ruser")]
    pub username: String,
    #[serde(rename = "rpassword")]
    pub password: String,
    /// Bucket receiving per-run checkpoints.
    #[serde(rename = "s3Txt")]
    pub checkpoint_bucket: String,
    /// Bucket receiving daily archives. Only the compactor needs it.
    #[serde(rename = "s3Zip", default)]
    pub archive_bucket: Option<String>,
}

impl fmt::Debug for QueueSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSecret")
            .field("host", &self.host)
            .field("queue_name", &self.queue_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("checkpoint_bucket", &self.checkpoint_bucket)
            .field("archive_bucket", &self.archive_bucket)
            .finish()
    }
}

pub fn parse_secret(secret_id: &str, raw: &str) -> Result<QueueSecret, CredentialError> {
    serde_json::from_str(raw).map_err(|e| CredentialError::Malformed {
        id: secret_id.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, secret_id: &str) -> Result<QueueSecret, CredentialError>;
}

/// AWS Secrets Manager. Decryption with the secret's KMS key happens
/// server-side.
#[derive(Clone)]
pub struct SecretsManagerProvider {
    client: SecretsClient,
}

impl SecretsManagerProvider {
    pub fn new(client: SecretsClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl CredentialProvider for SecretsManagerProvider {
    #[tracing::instrument(skip(self))]
    async fn resolve(&self, secret_id: &str) -> Result<QueueSecret, CredentialError> {
        let out = self
            .client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                let svc = e.into_service_error();
                let id = secret_id.to_string();
                if svc.is_resource_not_found_exception() {
                    CredentialError::NotFound(id)
                } else if svc.is_decryption_failure() {
                    CredentialError::Decryption(id)
                } else if is_access_denied(svc.code()) {
                    CredentialError::AccessDenied(id)
                } else {
                    CredentialError::Unavailable(DisplayErrorContext(&svc).to_string())
                }
            })?;

        let raw = out.secret_string().ok_or_else(|| CredentialError::Malformed {
            id: secret_id.to_string(),
            reason: "no SecretString".into(),
        })?;
        let secret = parse_secret(secret_id, raw)?;
        info!(host = %secret.host, queue = %secret.queue_name, "resolved queue secret");
        Ok(secret)
    }
}

fn is_access_denied(code: Option<&str>) -> bool {
    code.is_some_and(|c| c.contains("AccessDenied") || c.contains("Unauthorized"))
}

/// Secret JSON held in an environment variable named after the secret id,
/// e.g. `RabbitCreds` → `RABBITCREDS`. For local runs and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub fn var_name(secret_id: &str) -> String {
        secret_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(&self, secret_id: &str) -> Result<QueueSecret, CredentialError> {
        let var = Self::var_name(secret_id);
        let raw =
            std::env::var(&var).map_err(|_| CredentialError::NotFound(secret_id.to_string()))?;
        parse_secret(secret_id, &raw)
    }
}
