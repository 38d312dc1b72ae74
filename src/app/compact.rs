use tracing::{error, info};

use crate::emit::archive::ArchiveCompactor;
use crate::emit::notify::Notifier;
use crate::emit::ObjectStore;
use crate::types::InvocationResponse;

pub const COMPACT_OK_BODY: &str = "Zip file created and uploaded successfully.";
pub const COMPACT_OK_TEXT: &str = "Messages have been zipped and sent to object storage successfully.";

#[derive(Clone, Debug)]
pub struct CompactionPlan {
    pub source_bucket: String,
    pub destination_bucket: String,
    /// e.g. `2024-05-01/`
    pub date_prefix: String,
    /// e.g. `2024-05-01.zip`
    pub archive_key: String,
    pub topic: String,
}

/// Compact one day. Failures are notified and reported as a 400, never
/// retried here.
#[tracing::instrument(skip_all, fields(prefix = %plan.date_prefix))]
pub async fn run_compaction<S, N>(store: &S, notifier: &N, plan: &CompactionPlan) -> InvocationResponse
where
    S: ObjectStore + ?Sized,
    N: Notifier + ?Sized,
{
    let compactor = ArchiveCompactor::new(&plan.source_bucket, &plan.destination_bucket);
    match compactor
        .compact(store, &plan.date_prefix, &plan.archive_key)
        .await
    {
        Ok(Some(manifest)) => {
            info!(
                entries = manifest.keys.len(),
                archive_bytes = manifest.archive_bytes,
                "compaction done"
            );
            notifier.publish(&plan.topic, COMPACT_OK_TEXT).await;
            InvocationResponse::ok(COMPACT_OK_BODY)
        }
        Ok(None) => {
            let day = plan.date_prefix.trim_end_matches('/');
            InvocationResponse::ok(format!("No objects found for {day}"))
        }
        Err(e) => {
            error!(error = %e, "compaction failed");
            notifier.publish(&plan.topic, &failure_text(&e)).await;
            InvocationResponse::bad_request(e.to_string())
        }
    }
}

pub fn failure_text(err: &impl std::fmt::Display) -> String {
    format!("Error encountered while zipping message files. Please check the error below \n{err}")
}
