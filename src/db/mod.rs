//! Persistence layer: cache rows and schedules.
//!
//! Services depend on the [`CacheStore`] and [`ScheduleStore`] traits; the
//! binary wires in Firestore, tests and local runs use [`MemoryStore`].

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{InventoryRecord, RunStatus, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Collection names as constants.
pub mod collections {
    pub const INVENTORY: &str = "inventory";
    pub const SCHEDULES: &str = "schedules";
}

/// Which cache rows an operation touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// Rows of one account.
    Account(String),
    /// Every row (global snapshot sync).
    All,
}

impl CacheScope {
    pub fn includes(&self, record: &InventoryRecord) -> bool {
        match self {
            CacheScope::Account(id) => &record.account_id == id,
            CacheScope::All => true,
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheScope::Account(id) => write!(f, "account {}", id),
            CacheScope::All => write!(f, "all accounts"),
        }
    }
}

/// Operations the sync pipeline needs from the inventory cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Delete every row in `scope`, returning how many were removed.
    async fn delete_scope(&self, scope: &CacheScope) -> Result<usize, AppError>;

    /// Insert one chunk of rows. Callers keep chunks within store limits.
    async fn insert_chunk(&self, records: &[InventoryRecord]) -> Result<(), AppError>;

    /// Read rows of one account in a stable order, `limit` rows from `offset`.
    async fn select_range(
        &self,
        account_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryRecord>, AppError>;

    /// Insert or overwrite rows by their composite unique key.
    async fn upsert(&self, records: &[InventoryRecord]) -> Result<usize, AppError>;
}

/// Operator-managed schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn list_schedules(&self) -> Result<Vec<Schedule>, AppError>;

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>, AppError>;

    async fn put_schedule(&self, schedule: &Schedule) -> Result<(), AppError>;

    /// Annotate a schedule with the outcome of its latest run.
    async fn record_run(
        &self,
        id: &str,
        at: DateTime<Utc>,
        status: RunStatus,
    ) -> Result<(), AppError>;
}
