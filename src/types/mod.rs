//! Run results shared by the pipeline and the binaries.
//!
//! Nothing here is persisted; a `RunOutcome` lives for one run and ends up
//! in a notification.

use std::fmt;

use serde::Serialize;

pub mod fp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    PersistFailure,
    DrainFailure,
    AckFailure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::PersistFailure => "persist failure",
            RunStatus::DrainFailure => "drain failure",
            RunStatus::AckFailure => "ack failure",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub processed_count: usize,
    pub acked_count: usize,
    pub status: RunStatus,
    pub detail: String,
}

impl RunOutcome {
    pub fn success(processed_count: usize, detail: impl Into<String>) -> Self {
        Self {
            processed_count,
            acked_count: processed_count,
            status: RunStatus::Success,
            detail: detail.into(),
        }
    }

    pub fn persist_failure(processed_count: usize, detail: impl Into<String>) -> Self {
        Self {
            processed_count,
            acked_count: 0,
            status: RunStatus::PersistFailure,
            detail: detail.into(),
        }
    }

    pub fn drain_failure(detail: impl Into<String>) -> Self {
        Self {
            processed_count: 0,
            acked_count: 0,
            status: RunStatus::DrainFailure,
            detail: detail.into(),
        }
    }

    pub fn ack_failure(processed_count: usize, acked_count: usize, detail: impl Into<String>) -> Self {
        Self {
            processed_count,
            acked_count,
            status: RunStatus::AckFailure,
            detail: detail.into(),
        }
    }
}

/// What a scheduler invocation returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            body: body.into(),
        }
    }

    pub fn bad_request(body: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            body: body.into(),
        }
    }
}
