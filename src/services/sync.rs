// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cache replacement: delete a scope, then insert fresh rows in chunks.
//!
//! The delete and the inserts are separate store calls, so a reader can
//! observe an empty or half-filled scope while a replace is running. A
//! failed insert leaves the scope partially replaced and is reported as
//! [`AppError::PartialReplace`] rather than hidden.
//!
//! Writes to the same account are serialized. Replaces and seeds hold the
//! global gate shared plus the mutex of every account they touch, taken in
//! sorted order; a replace of every account holds the global gate
//! exclusively.

use crate::db::{CacheScope, CacheStore};
use crate::error::AppError;
use crate::models::{InventoryRecord, RecordOrigin};
use crate::services::jobs::ProgressSink;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use validator::Validate;

/// Page size used when reading a whole account back.
const READ_PAGE_SIZE: usize = 500;

/// Summary of one replace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaceReport {
    pub deleted: usize,
    pub written: usize,
    pub chunks: usize,
    /// Set when the delete step failed and stale rows may remain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_error: Option<String>,
}

/// Held for the duration of a cache write.
struct ScopeGuard<'a> {
    _exclusive: Option<RwLockWriteGuard<'a, ()>>,
    _shared: Option<RwLockReadGuard<'a, ()>>,
    _accounts: Vec<OwnedMutexGuard<()>>,
}

#[derive(Clone)]
pub struct SyncPipeline {
    store: Arc<dyn CacheStore>,
    chunk_size: usize,
    global: Arc<RwLock<()>>,
    account_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SyncPipeline {
    pub fn new(store: Arc<dyn CacheStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            global: Arc::new(RwLock::new(())),
            account_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    async fn lock_scope(&self, scope: &CacheScope) -> ScopeGuard<'_> {
        match scope {
            CacheScope::All => ScopeGuard {
                _exclusive: Some(self.global.write().await),
                _shared: None,
                _accounts: Vec::new(),
            },
            CacheScope::Account(id) => self.lock_accounts([id.as_str()].into()).await,
        }
    }

    async fn lock_accounts(&self, accounts: BTreeSet<&str>) -> ScopeGuard<'_> {
        let shared = self.global.read().await;
        let mut held = Vec::with_capacity(accounts.len());
        for id in accounts {
            let lock = self
                .account_locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            held.push(lock.lock_owned().await);
        }
        ScopeGuard {
            _exclusive: None,
            _shared: Some(shared),
            _accounts: held,
        }
    }

    /// Replace every row in `scope` with `records`.
    pub async fn replace(
        &self,
        scope: &CacheScope,
        records: Vec<InventoryRecord>,
        progress: &dyn ProgressSink,
    ) -> Result<ReplaceReport, AppError> {
        if let Some(stray) = records.iter().find(|r| !scope.includes(r)) {
            return Err(AppError::BadRequest(format!(
                "Record for account {} cannot be written while replacing {}",
                stray.account_id, scope
            )));
        }

        let _guard = self.lock_scope(scope).await;
        let mut report = ReplaceReport::default();

        match self.store.delete_scope(scope).await {
            Ok(deleted) => {
                report.deleted = deleted;
                progress
                    .log(format!("Cleared {} cached rows for {}", deleted, scope))
                    .await;
            }
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "Cache delete failed, inserting anyway");
                progress
                    .log(format!("Could not clear cache for {}: {}", scope, e))
                    .await;
                report.delete_error = Some(e.to_string());
            }
        }

        let expected = records.len();
        for chunk in records.chunks(self.chunk_size) {
            if let Err(e) = self.store.insert_chunk(chunk).await {
                tracing::error!(
                    scope = %scope,
                    written = report.written,
                    expected,
                    error = %e,
                    "Cache insert failed mid-replace"
                );
                return Err(AppError::PartialReplace {
                    scope: scope.to_string(),
                    written: report.written,
                    expected,
                    reason: e.to_string(),
                });
            }
            report.written += chunk.len();
            report.chunks += 1;
            progress
                .log(format!(
                    "Wrote {}/{} rows for {}",
                    report.written, expected, scope
                ))
                .await;
        }

        tracing::info!(
            scope = %scope,
            deleted = report.deleted,
            written = report.written,
            chunks = report.chunks,
            "Cache replaced"
        );
        Ok(report)
    }

    /// Apply origin rules and drop rows that fail validation.
    ///
    /// Manual uploads describe stock on hand, so empty bins are dropped.
    /// Fetched rows keep zero-quantity bins as known locations.
    pub fn prepare(&self, origin: RecordOrigin, records: Vec<InventoryRecord>) -> Vec<InventoryRecord> {
        let total = records.len();
        let kept: Vec<InventoryRecord> = records
            .into_iter()
            .filter(|r| origin != RecordOrigin::ManualUpload || r.quantity > 0)
            .filter(|r| r.validate().is_ok())
            .collect();

        if kept.len() < total {
            tracing::debug!(?origin, dropped = total - kept.len(), "Dropped records during prepare");
        }
        kept
    }

    /// Upsert rows by their composite key without clearing anything.
    ///
    /// Every account in the batch stays locked until the last chunk lands.
    pub async fn seed(&self, records: Vec<InventoryRecord>) -> Result<usize, AppError> {
        let accounts: BTreeSet<&str> = records.iter().map(|r| r.account_id.as_str()).collect();
        let _guard = self.lock_accounts(accounts).await;

        let mut written = 0;
        for chunk in records.chunks(self.chunk_size) {
            written += self.store.upsert(chunk).await?;
        }
        tracing::info!(written, "Seeded cache rows");
        Ok(written)
    }

    /// Read every cached row of an account, paging until a short page.
    pub async fn read_all(&self, account_id: &str) -> Result<Vec<InventoryRecord>, AppError> {
        let mut rows = Vec::new();
        loop {
            let page = self
                .store
                .select_range(account_id, rows.len(), READ_PAGE_SIZE)
                .await?;
            let short = page.len() < READ_PAGE_SIZE;
            rows.extend(page);
            if short {
                return Ok(rows);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::jobs::LogProgress;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn record(account: &str, sku: &str, location: &str, quantity: i64) -> InventoryRecord {
        InventoryRecord {
            account_id: account.to_string(),
            sku: sku.to_string(),
            location_name: location.to_string(),
            quantity,
            pickable: true,
            sellable: true,
            warehouse_identifier: "WH1".to_string(),
            product_name: String::new(),
            barcode: None,
            synced_at: Utc::now(),
        }
    }

    /// Wraps a memory store with injectable failures and a slow insert.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_delete: bool,
        /// Fail the insert call with this index (0-based).
        fail_insert_at: Option<usize>,
        insert_delay: Duration,
        upsert_delay: Duration,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn delete_scope(&self, scope: &CacheScope) -> Result<usize, AppError> {
            if self.fail_delete {
                return Err(AppError::Database("delete timed out".into()));
            }
            self.inner.delete_scope(scope).await
        }

        async fn insert_chunk(&self, records: &[InventoryRecord]) -> Result<(), AppError> {
            let n = self.inserts.fetch_add(1, Ordering::SeqCst);
            if self.fail_insert_at == Some(n) {
                return Err(AppError::Database("insert rejected".into()));
            }
            if !self.insert_delay.is_zero() {
                tokio::time::sleep(self.insert_delay).await;
            }
            self.inner.insert_chunk(records).await
        }

        async fn select_range(
            &self,
            account_id: &str,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<InventoryRecord>, AppError> {
            self.inner.select_range(account_id, offset, limit).await
        }

        async fn upsert(&self, records: &[InventoryRecord]) -> Result<usize, AppError> {
            if !self.upsert_delay.is_zero() {
                tokio::time::sleep(self.upsert_delay).await;
            }
            self.inner.upsert(records).await
        }
    }

    fn keys(records: &[InventoryRecord]) -> BTreeSet<(String, String)> {
        records
            .iter()
            .map(|r| (r.sku.clone(), r.location_name.clone()))
            .collect()
    }

    #[tokio::test]
    async fn replace_leaves_exactly_new_rows_and_spares_other_accounts() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = SyncPipeline::new(store.clone(), 2);

        store
            .insert_chunk(&[
                record("A", "OLD", "X-1", 5),
                record("B", "KEEP", "Y-1", 7),
            ])
            .await
            .unwrap();

        let fresh = vec![
            record("A", "MUG", "A-01", 1),
            record("A", "MUG", "A-02", 0),
            record("A", "CUP", "B-01", 3),
        ];
        let report = pipeline
            .replace(&CacheScope::Account("A".into()), fresh.clone(), &LogProgress)
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.written, 3);
        assert_eq!(report.chunks, 2);
        assert_eq!(keys(&pipeline.read_all("A").await.unwrap()), keys(&fresh));
        assert_eq!(pipeline.read_all("B").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_rejects_rows_outside_scope() {
        let store = Arc::new(MemoryStore::new());
        store.insert_chunk(&[record("A", "OLD", "X-1", 5)]).await.unwrap();
        let pipeline = SyncPipeline::new(store.clone(), 10);

        let err = pipeline
            .replace(
                &CacheScope::Account("A".into()),
                vec![record("B", "MUG", "A-01", 1)],
                &LogProgress,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn insert_failure_reports_partial_replace() {
        let store = Arc::new(FlakyStore {
            fail_insert_at: Some(1),
            ..FlakyStore::default()
        });
        let pipeline = SyncPipeline::new(store.clone(), 2);

        let records: Vec<_> = (0..5).map(|i| record("A", "SKU", &format!("L{}", i), 1)).collect();
        let err = pipeline
            .replace(&CacheScope::Account("A".into()), records, &LogProgress)
            .await
            .unwrap_err();

        match err {
            AppError::PartialReplace { written, expected, .. } => {
                assert_eq!(written, 2);
                assert_eq!(expected, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.inner.len(), 2);
    }

    #[tokio::test]
    async fn delete_failure_still_inserts() {
        let store = Arc::new(FlakyStore {
            fail_delete: true,
            ..FlakyStore::default()
        });
        store.inner.insert_chunk(&[record("A", "OLD", "X-1", 5)]).await.unwrap();
        let pipeline = SyncPipeline::new(store.clone(), 10);

        let report = pipeline
            .replace(
                &CacheScope::Account("A".into()),
                vec![record("A", "NEW", "A-01", 2)],
                &LogProgress,
            )
            .await
            .unwrap();

        assert!(report.delete_error.is_some());
        assert_eq!(report.written, 1);
        // Stale row survives alongside the new one.
        assert_eq!(store.inner.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_replaces_of_one_account_do_not_interleave() {
        let store = Arc::new(FlakyStore {
            insert_delay: Duration::from_millis(5),
            ..FlakyStore::default()
        });
        let pipeline = SyncPipeline::new(store.clone(), 1);

        let first: Vec<_> = (0..4).map(|i| record("A", "FIRST", &format!("L{}", i), 1)).collect();
        let second: Vec<_> = (0..4).map(|i| record("A", "SECOND", &format!("L{}", i), 1)).collect();

        let scope = CacheScope::Account("A".into());
        let (a, b) = tokio::join!(
            pipeline.replace(&scope, first.clone(), &LogProgress),
            pipeline.replace(&scope, second.clone(), &LogProgress),
        );
        a.unwrap();
        b.unwrap();

        let cached = keys(&pipeline.read_all("A").await.unwrap());
        assert!(cached == keys(&first) || cached == keys(&second));
    }

    #[tokio::test]
    async fn slow_seed_is_not_torn_by_concurrent_replace() {
        let store = Arc::new(FlakyStore {
            upsert_delay: Duration::from_millis(40),
            ..FlakyStore::default()
        });
        let pipeline = SyncPipeline::new(store.clone(), 1);
        let seeded = vec![record("A", "S1", "L1", 1), record("A", "S2", "L2", 1)];
        let replaced = vec![record("A", "R1", "L3", 1)];

        let scope = CacheScope::Account("A".into());
        let late_replace = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pipeline.replace(&scope, replaced.clone(), &LogProgress).await
        };
        let (seed, replace) = tokio::join!(pipeline.seed(seeded.clone()), late_replace);
        seed.unwrap();
        replace.unwrap();

        // The seed started first, so the replace must see all of it.
        assert_eq!(keys(&pipeline.read_all("A").await.unwrap()), keys(&replaced));
    }

    #[tokio::test]
    async fn full_replace_excludes_account_writers() {
        let store = Arc::new(FlakyStore {
            insert_delay: Duration::from_millis(10),
            ..FlakyStore::default()
        });
        store
            .inner
            .insert_chunk(&[record("A", "OLD", "X-1", 1), record("C", "OLD", "X-1", 1)])
            .await
            .unwrap();
        let pipeline = SyncPipeline::new(store.clone(), 1);

        let everything: Vec<_> = (0..4)
            .flat_map(|i| {
                [
                    record("A", "ALL", &format!("L{}", i), 1),
                    record("B", "ALL", &format!("L{}", i), 1),
                ]
            })
            .collect();
        let account_rows = vec![record("A", "MINE", "M-1", 1)];

        let account_scope = CacheScope::Account("A".into());
        let late_replace = async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            pipeline
                .replace(&account_scope, account_rows.clone(), &LogProgress)
                .await
        };
        let (full, account) = tokio::join!(
            pipeline.replace(&CacheScope::All, everything.clone(), &LogProgress),
            late_replace,
        );

        let full = full.unwrap();
        assert_eq!(full.deleted, 2);
        assert_eq!(full.written, 8);
        account.unwrap();

        // The account replace waited for the full replace to finish.
        assert_eq!(keys(&pipeline.read_all("A").await.unwrap()), keys(&account_rows));
        assert_eq!(pipeline.read_all("B").await.unwrap().len(), 4);
        assert!(pipeline.read_all("C").await.unwrap().is_empty());
    }

    #[test]
    fn manual_uploads_drop_empty_bins_but_fetches_keep_them() {
        let pipeline = SyncPipeline::new(Arc::new(MemoryStore::new()), 10);
        let rows = vec![
            record("A", "MUG", "A-01", 0),
            record("A", "MUG", "A-02", 4),
            record("A", "MUG", "A-03", -1),
        ];

        assert_eq!(pipeline.prepare(RecordOrigin::ManualUpload, rows.clone()).len(), 1);
        assert_eq!(pipeline.prepare(RecordOrigin::LiveFetch, rows).len(), 3);
    }

    #[test]
    fn prepare_drops_rows_without_sku() {
        let pipeline = SyncPipeline::new(Arc::new(MemoryStore::new()), 10);
        let rows = vec![record("A", "", "A-01", 1), record("A", "MUG", "A-02", 1)];
        assert_eq!(pipeline.prepare(RecordOrigin::LiveFetch, rows).len(), 1);
    }

    #[tokio::test]
    async fn seed_upserts_by_composite_key() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = SyncPipeline::new(store.clone(), 10);

        pipeline.seed(vec![record("A", "MUG", "A-01", 1)]).await.unwrap();
        pipeline.seed(vec![record("A", "MUG", "A-01", 9)]).await.unwrap();

        let rows = pipeline.read_all("A").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 9);
    }

    #[tokio::test]
    async fn read_all_pages_past_first_page() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = SyncPipeline::new(store.clone(), 500);
        let rows: Vec<_> = (0..READ_PAGE_SIZE + 3)
            .map(|i| record("A", "SKU", &format!("L{:04}", i), 1))
            .collect();
        pipeline.seed(rows).await.unwrap();

        assert_eq!(pipeline.read_all("A").await.unwrap().len(), READ_PAGE_SIZE + 3);
    }
}
