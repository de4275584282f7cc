//! Transient progress record for a manual refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncJobStatus {
    Running,
    Completed,
    Failed,
}

/// In-memory job tracking one manual refresh.
///
/// Lives in the job registry only; purged a fixed time after it finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: String,
    pub account_id: String,
    pub status: SyncJobStatus,
    /// Progress lines in the order they were written
    pub logs: Vec<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    pub fn new(id: String, account_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            account_id,
            status: SyncJobStatus::Running,
            logs: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            finished_at: None,
        }
    }
}
