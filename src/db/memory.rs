//! In-process store backed by concurrent maps.
//!
//! Used for local runs (`GCP_PROJECT_ID=memory`) and tests.

use crate::db::{CacheScope, CacheStore, ScheduleStore};
use crate::error::AppError;
use crate::models::{InventoryRecord, RunStatus, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inventory: Arc<DashMap<String, InventoryRecord>>,
    schedules: Arc<DashMap<String, Schedule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all accounts.
    pub fn len(&self) -> usize {
        self.inventory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inventory.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn delete_scope(&self, scope: &CacheScope) -> Result<usize, AppError> {
        let before = self.inventory.len();
        self.inventory.retain(|_, record| !scope.includes(record));
        Ok(before - self.inventory.len())
    }

    async fn insert_chunk(&self, records: &[InventoryRecord]) -> Result<(), AppError> {
        for record in records {
            self.inventory.insert(record.document_id(), record.clone());
        }
        Ok(())
    }

    async fn select_range(
        &self,
        account_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        let mut rows: Vec<(String, InventoryRecord)> = self
            .inventory
            .iter()
            .filter(|entry| entry.value().account_id == account_id)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, record)| record)
            .collect())
    }

    async fn upsert(&self, records: &[InventoryRecord]) -> Result<usize, AppError> {
        self.insert_chunk(records).await?;
        Ok(records.len())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn list_schedules(&self) -> Result<Vec<Schedule>, AppError> {
        let mut schedules: Vec<Schedule> =
            self.schedules.iter().map(|e| e.value().clone()).collect();
        schedules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(schedules)
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>, AppError> {
        Ok(self.schedules.get(id).map(|e| e.value().clone()))
    }

    async fn put_schedule(&self, schedule: &Schedule) -> Result<(), AppError> {
        self.schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn record_run(
        &self,
        id: &str,
        at: DateTime<Utc>,
        status: RunStatus,
    ) -> Result<(), AppError> {
        let mut entry = self
            .schedules
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("Schedule {}", id)))?;
        entry.last_run_at = Some(at);
        entry.last_run_status = Some(status);
        Ok(())
    }
}
