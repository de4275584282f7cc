// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore implementation of the cache and schedule stores.
//!
//! Inventory rows live in one collection keyed by
//! [`InventoryRecord::document_id`]; schedules are keyed by their id.

use crate::db::{collections, CacheScope, CacheStore, ScheduleStore};
use crate::error::AppError;
use crate::models::{InventoryRecord, RunStatus, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Writes per transaction. Firestore caps a commit at 500 operations.
const BATCH_SIZE: usize = 400;

/// Placeholder credential accepted by the emulator.
const EMULATOR_TOKEN: &str = "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0.";

fn db_error(context: &'static str) -> impl Fn(firestore::errors::FirestoreError) -> AppError {
    move |e| AppError::Database(format!("{}: {}", context, e))
}

/// Firestore-backed cache and schedule store.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Connect to `project_id`, or to the emulator when
    /// `FIRESTORE_EMULATOR_HOST` is set.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        let emulator = std::env::var("FIRESTORE_EMULATOR_HOST").is_ok();
        let client = if emulator {
            Self::connect_emulator(project_id).await?
        } else {
            firestore::FirestoreDb::new(project_id)
                .await
                .map_err(db_error("Failed to connect to Firestore"))?
        };

        tracing::info!(project = project_id, emulator, "Connected to Firestore");
        Ok(Self {
            client: Some(client),
        })
    }

    async fn connect_emulator(project_id: &str) -> Result<firestore::FirestoreDb, AppError> {
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(EMULATOR_TOKEN.to_string().into()),
                expiry: Utc::now() + chrono::Duration::hours(1),
            })
        });

        firestore::FirestoreDb::with_options_token_source(
            firestore::FirestoreDbOptions::new(project_id.to_string()),
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(db_error("Failed to connect to Firestore emulator"))
    }

    /// A store with no connection. Every operation fails with a database error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Firestore is offline".to_string()))
    }

    /// Load every inventory row in `scope`.
    async fn query_scope(&self, scope: &CacheScope) -> Result<Vec<InventoryRecord>, AppError> {
        let query = self.client()?.fluent().select().from(collections::INVENTORY);

        let query = match scope {
            CacheScope::Account(account_id) => {
                let account_id = account_id.clone();
                query.filter(move |q| q.for_all([q.field("account_id").eq(account_id.clone())]))
            }
            CacheScope::All => query,
        };

        query.obj().query().await.map_err(db_error("Inventory query failed"))
    }

    /// Apply `records` as deletes or writes, one transaction per chunk.
    async fn commit_chunks(
        &self,
        records: &[InventoryRecord],
        delete: bool,
    ) -> Result<(), AppError> {
        let client = self.client()?;

        for chunk in records.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(db_error("Failed to begin transaction"))?;

            for record in chunk {
                let id = record.document_id();
                let staged = if delete {
                    client
                        .fluent()
                        .delete()
                        .from(collections::INVENTORY)
                        .document_id(&id)
                        .add_to_transaction(&mut transaction)
                } else {
                    client
                        .fluent()
                        .update()
                        .in_col(collections::INVENTORY)
                        .document_id(&id)
                        .object(record)
                        .add_to_transaction(&mut transaction)
                };
                staged.map_err(db_error("Failed to stage inventory row"))?;
            }

            transaction
                .commit()
                .await
                .map_err(db_error("Inventory commit failed"))?;
        }

        Ok(())
    }
}

#[async_trait]
impl CacheStore for FirestoreDb {
    async fn delete_scope(&self, scope: &CacheScope) -> Result<usize, AppError> {
        let existing = self.query_scope(scope).await?;
        let count = existing.len();
        self.commit_chunks(&existing, true).await?;

        tracing::debug!(scope = %scope, count, "Deleted inventory rows");
        Ok(count)
    }

    async fn insert_chunk(&self, records: &[InventoryRecord]) -> Result<(), AppError> {
        self.commit_chunks(records, false).await
    }

    async fn select_range(
        &self,
        account_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InventoryRecord>, AppError> {
        let account_id = account_id.to_string();
        let offset = u32::try_from(offset)
            .map_err(|_| AppError::BadRequest("offset too large".to_string()))?;
        let limit =
            u32::try_from(limit).map_err(|_| AppError::BadRequest("limit too large".to_string()))?;

        self.client()?
            .fluent()
            .select()
            .from(collections::INVENTORY)
            .filter(move |q| q.for_all([q.field("account_id").eq(account_id.clone())]))
            .order_by([
                ("sku", firestore::FirestoreQueryDirection::Ascending),
                ("location_name", firestore::FirestoreQueryDirection::Ascending),
            ])
            .limit(limit)
            .offset(offset)
            .obj()
            .query()
            .await
            .map_err(db_error("Firestore request failed"))
    }

    async fn upsert(&self, records: &[InventoryRecord]) -> Result<usize, AppError> {
        self.commit_chunks(records, false).await?;
        Ok(records.len())
    }
}

#[async_trait]
impl ScheduleStore for FirestoreDb {
    async fn list_schedules(&self) -> Result<Vec<Schedule>, AppError> {
        self.client()?
            .fluent()
            .select()
            .from(collections::SCHEDULES)
            .obj()
            .query()
            .await
            .map_err(db_error("Firestore request failed"))
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>, AppError> {
        self.client()?
            .fluent()
            .select()
            .by_id_in(collections::SCHEDULES)
            .obj()
            .one(id)
            .await
            .map_err(db_error("Firestore request failed"))
    }

    async fn put_schedule(&self, schedule: &Schedule) -> Result<(), AppError> {
        let _: () = self
            .client()?
            .fluent()
            .update()
            .in_col(collections::SCHEDULES)
            .document_id(&schedule.id)
            .object(schedule)
            .execute()
            .await
            .map_err(db_error("Firestore request failed"))?;
        Ok(())
    }

    async fn record_run(
        &self,
        id: &str,
        at: DateTime<Utc>,
        status: RunStatus,
    ) -> Result<(), AppError> {
        let mut schedule = self
            .get_schedule(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schedule {}", id)))?;

        schedule.last_run_at = Some(at);
        schedule.last_run_status = Some(status);
        self.put_schedule(&schedule).await
    }
}
