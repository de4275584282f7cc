//! Remote inventory snapshot job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a remote snapshot generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Processing,
    Success,
    Error,
    Aborted,
}

impl SnapshotStatus {
    /// Parse the remote status string; unknown values are treated as still
    /// in progress.
    pub fn from_remote(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pending" | "enqueued" => SnapshotStatus::Pending,
            "success" | "completed" => SnapshotStatus::Success,
            "error" | "failed" => SnapshotStatus::Error,
            "aborted" | "cancelled" | "canceled" => SnapshotStatus::Aborted,
            _ => SnapshotStatus::Processing,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SnapshotStatus::Success | SnapshotStatus::Error | SnapshotStatus::Aborted
        )
    }
}

/// Snapshot job as last reported by the remote system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotJob {
    /// Remote snapshot ID (the only identity we rely on)
    pub id: String,
    pub account_id: String,
    pub notify_email: Option<String>,
    pub status: SnapshotStatus,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}
