// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Registry of manual refresh jobs and their progress logs.
//!
//! Jobs are created when an operator starts a refresh, written to by the
//! detached task doing the work, and polled by the operator. Storage is
//! injected through [`JobStore`] so the in-memory map can be swapped for a
//! persistent store without touching callers.

use crate::error::AppError;
use crate::models::{SyncJob, SyncJobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Receives operator-facing progress lines for a long-running operation.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn log(&self, line: String);
}

/// Progress sink that only emits tracing events.
pub struct LogProgress;

#[async_trait]
impl ProgressSink for LogProgress {
    async fn log(&self, line: String) {
        tracing::info!(progress = %line, "Sync progress");
    }
}

/// Storage for [`SyncJob`]s.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: SyncJob) -> Result<(), AppError>;

    async fn get(&self, id: &str) -> Result<Option<SyncJob>, AppError>;

    /// Apply `update` to a stored job. Missing jobs are ignored.
    async fn update(
        &self,
        id: &str,
        update: Box<dyn for<'a> FnOnce(&'a mut SyncJob) + Send>,
    ) -> Result<(), AppError>;

    async fn list(&self) -> Result<Vec<SyncJob>, AppError>;

    async fn remove(&self, id: &str) -> Result<(), AppError>;
}

/// Job storage in a concurrent map, lost on restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<String, SyncJob>,
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: SyncJob) -> Result<(), AppError> {
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SyncJob>, AppError> {
        Ok(self.jobs.get(id).map(|job| job.value().clone()))
    }

    async fn update(
        &self,
        id: &str,
        update: Box<dyn for<'a> FnOnce(&'a mut SyncJob) + Send>,
    ) -> Result<(), AppError> {
        if let Some(mut job) = self.jobs.get_mut(id) {
            update(job.value_mut());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncJob>, AppError> {
        Ok(self.jobs.iter().map(|job| job.value().clone()).collect())
    }

    async fn remove(&self, id: &str) -> Result<(), AppError> {
        self.jobs.remove(id);
        Ok(())
    }
}

/// Process-owned registry of refresh jobs.
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn JobStore>,
    retention: Duration,
    /// Serializes the running-job check with the insert in [`Self::start`].
    start_gate: Arc<Mutex<()>>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            start_gate: Arc::new(Mutex::new(())),
        }
    }

    fn retention(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.retention).unwrap_or_else(|_| chrono::Duration::minutes(10))
    }

    fn is_expired(&self, job: &SyncJob, now: DateTime<Utc>) -> bool {
        job.finished_at
            .is_some_and(|finished| now - finished >= self.retention())
    }

    /// Create a running job for `account_id` and return its ID.
    ///
    /// Fails with [`AppError::Conflict`] while another job for the same
    /// account is running.
    pub async fn start(&self, account_id: &str) -> Result<String, AppError> {
        self.purge_expired(Utc::now()).await;

        let _gate = self.start_gate.lock().await;
        if self.has_running(account_id).await? {
            return Err(AppError::Conflict(format!(
                "A refresh for account {} is already running",
                account_id
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.store
            .insert(SyncJob::new(id.clone(), account_id.to_string(), Utc::now()))
            .await?;
        tracing::info!(job_id = %id, account_id, "Sync job started");
        Ok(id)
    }

    /// Append a progress line. Logging never fails the job.
    pub async fn log(&self, id: &str, line: String) {
        tracing::info!(job_id = %id, progress = %line, "Sync progress");
        let result = self
            .store
            .update(id, Box::new(move |job: &mut SyncJob| job.logs.push(line)))
            .await;
        if let Err(e) = result {
            tracing::warn!(job_id = %id, error = %e, "Failed to record job progress");
        }
    }

    pub async fn complete(&self, id: &str, result: serde_json::Value) -> Result<(), AppError> {
        let now = Utc::now();
        self.store
            .update(
                id,
                Box::new(move |job: &mut SyncJob| {
                    job.status = SyncJobStatus::Completed;
                    job.result = Some(result);
                    job.finished_at = Some(now);
                }),
            )
            .await?;
        tracing::info!(job_id = %id, "Sync job completed");
        Ok(())
    }

    pub async fn fail(&self, id: &str, error: String) -> Result<(), AppError> {
        tracing::warn!(job_id = %id, error = %error, "Sync job failed");
        let now = Utc::now();
        self.store
            .update(
                id,
                Box::new(move |job: &mut SyncJob| {
                    job.status = SyncJobStatus::Failed;
                    job.error = Some(error);
                    job.finished_at = Some(now);
                }),
            )
            .await
    }

    /// Look up a job. Finished jobs past retention are dropped on read.
    pub async fn get(&self, id: &str) -> Result<Option<SyncJob>, AppError> {
        match self.store.get(id).await? {
            Some(job) if self.is_expired(&job, Utc::now()) => {
                self.store.remove(id).await?;
                Ok(None)
            }
            job => Ok(job),
        }
    }

    /// Whether any job for `account_id` is still running.
    pub async fn has_running(&self, account_id: &str) -> Result<bool, AppError> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .any(|job| job.account_id == account_id && job.status == SyncJobStatus::Running))
    }

    /// Remove finished jobs older than the retention window. Returns how
    /// many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let jobs = match self.store.list().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list jobs for purge");
                return 0;
            }
        };

        let mut removed = 0;
        for job in jobs {
            if self.is_expired(&job, now) && self.store.remove(&job.id).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Purged expired sync jobs");
        }
        removed
    }

    /// Progress sink writing into job `id`.
    pub fn progress(&self, id: &str) -> JobProgress {
        JobProgress {
            registry: self.clone(),
            job_id: id.to_string(),
        }
    }
}

/// Adapts one job's log to [`ProgressSink`].
pub struct JobProgress {
    registry: JobRegistry,
    job_id: String,
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn log(&self, line: String) {
        self.registry.log(&self.job_id, line).await;
    }
}
