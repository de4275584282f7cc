// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Inventory sync flows.
//!
//! Composes the page fetcher, snapshot controller and sync pipeline into the
//! two ways an account's cache is refreshed:
//! - live: cursor-paginated `warehouse_products` query
//! - snapshot: remote-generated export (submit, poll, download)
//!
//! Manual refreshes run the same flows on a detached task and report
//! progress through the job registry.

use crate::config::Config;
use crate::db::CacheScope;
use crate::error::AppError;
use crate::models::{InventoryRecord, RecordOrigin, SnapshotJob, SyncMode};
use crate::services::graphql::GraphqlClient;
use crate::services::jobs::{JobRegistry, ProgressSink};
use crate::services::pagination::{
    FetchLimits, Normalizer, PageFetcher, PageRequest, StopReason,
};
use crate::services::snapshot::{AbortOutcome, PollSettings, SnapshotController};
use crate::services::sync::{ReplaceReport, SyncPipeline};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-product inventory with bin locations, one page at a time.
pub const INVENTORY_QUERY: &str = r#"
query InventoryPage($customer_account_id: String, $first: Int, $after: String) {
  warehouse_products(customer_account_id: $customer_account_id) {
    request_id
    complexity
    data(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      edges {
        node {
          sku
          warehouse_identifier
          product { name barcode }
          locations(first: 100) {
            edges {
              node {
                quantity
                location { name pickable sellable }
              }
            }
          }
        }
      }
    }
  }
}
"#;

/// JSON pointer to the paginated connection in [`INVENTORY_QUERY`] results.
pub const INVENTORY_CONNECTION_PATH: &str = "/warehouse_products/data";

/// Account key of syncs covering every account.
pub const ALL_ACCOUNTS: &str = "*";

#[derive(Debug, Deserialize)]
struct ProductNode {
    sku: String,
    #[serde(default)]
    warehouse_identifier: Option<String>,
    #[serde(default)]
    product: Option<ProductInfo>,
    #[serde(default)]
    locations: Option<LocationConnection>,
}

#[derive(Debug, Deserialize)]
struct ProductInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    barcode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationConnection {
    #[serde(default)]
    edges: Vec<LocationEdge>,
}

#[derive(Debug, Deserialize)]
struct LocationEdge {
    node: LocationNode,
}

#[derive(Debug, Deserialize)]
struct LocationNode {
    #[serde(default)]
    quantity: Option<i64>,
    #[serde(default)]
    location: Option<LocationInfo>,
}

#[derive(Debug, Deserialize)]
struct LocationInfo {
    name: String,
    #[serde(default)]
    pickable: Option<bool>,
    #[serde(default)]
    sellable: Option<bool>,
}

/// Maps `warehouse_products` nodes to one record per bin location.
pub struct InventoryNormalizer {
    pub account_id: String,
    pub synced_at: DateTime<Utc>,
}

impl Normalizer for InventoryNormalizer {
    type Item = InventoryRecord;

    fn normalize(&self, node: &serde_json::Value) -> Vec<InventoryRecord> {
        let product: ProductNode = match serde_json::from_value(node.clone()) {
            Ok(product) => product,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed product node");
                return Vec::new();
            }
        };

        let (name, barcode) = product
            .product
            .map(|p| (p.name.unwrap_or_default(), p.barcode))
            .unwrap_or_default();
        let warehouse_identifier = product.warehouse_identifier.unwrap_or_default();

        product
            .locations
            .map(|l| l.edges)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| {
                let location = edge.node.location?;
                Some(InventoryRecord {
                    account_id: self.account_id.clone(),
                    sku: product.sku.clone(),
                    location_name: location.name,
                    quantity: edge.node.quantity.unwrap_or(0).max(0),
                    pickable: location.pickable.unwrap_or(true),
                    sellable: location.sellable.unwrap_or(true),
                    warehouse_identifier: warehouse_identifier.clone(),
                    product_name: name.clone(),
                    barcode: barcode.clone(),
                    synced_at: self.synced_at,
                })
            })
            .collect()
    }
}

/// What one sync did.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    /// Synced account, or [`ALL_ACCOUNTS`]
    pub account_id: String,
    pub mode: SyncMode,
    /// Records received from the remote system
    pub fetched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Whether the cache now holds exactly the fetched rows
    pub replaced: bool,
    pub report: ReplaceReport,
}

/// Refreshes one account's cache and reads it back.
#[async_trait]
pub trait AccountSync: Send + Sync {
    async fn sync_account(
        &self,
        account_id: &str,
        mode: SyncMode,
        notify_email: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<SyncSummary, AppError>;

    async fn cached_rows(&self, account_id: &str) -> Result<Vec<InventoryRecord>, AppError>;
}

#[derive(Clone)]
pub struct InventorySync {
    fetcher: PageFetcher,
    snapshots: SnapshotController,
    pipeline: SyncPipeline,
    jobs: JobRegistry,
    page_size: u32,
    poll: PollSettings,
    /// Cancellation handles of snapshot waits running in this process.
    waits: Arc<DashMap<String, CancellationToken>>,
}

impl InventorySync {
    pub fn new(
        client: GraphqlClient,
        pipeline: SyncPipeline,
        jobs: JobRegistry,
        config: &Config,
    ) -> Self {
        let limits = FetchLimits {
            page_delay: config.page_delay,
            credit_cooldown: config.credit_cooldown,
            max_pages: config.max_pages,
            budget: config.fetch_deadline,
            deadline_margin: config.deadline_margin,
            ..FetchLimits::default()
        };

        Self {
            fetcher: PageFetcher::new(client.clone(), limits),
            snapshots: SnapshotController::new(client),
            pipeline,
            jobs,
            page_size: config.page_size,
            poll: PollSettings {
                interval: config.snapshot_poll_interval,
                max_polls: config.snapshot_max_polls,
            },
            waits: Arc::new(DashMap::new()),
        }
    }

    pub fn snapshots(&self) -> &SnapshotController {
        &self.snapshots
    }

    pub fn pipeline(&self) -> &SyncPipeline {
        &self.pipeline
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Fetch an account page by page and replace its cache.
    ///
    /// A fetch cut short by the page limit or the deadline is upserted
    /// without clearing the account, so rows on unfetched pages survive.
    pub async fn sync_live(
        &self,
        account_id: &str,
        progress: &dyn ProgressSink,
    ) -> Result<SyncSummary, AppError> {
        let request = PageRequest {
            document: INVENTORY_QUERY.to_string(),
            variables: serde_json::json!({ "customer_account_id": account_id }),
            connection_path: INVENTORY_CONNECTION_PATH.to_string(),
            page_size: self.page_size,
        };
        let normalizer = InventoryNormalizer {
            account_id: account_id.to_string(),
            synced_at: Utc::now(),
        };

        progress
            .log(format!("Fetching inventory for account {}", account_id))
            .await;
        let outcome = self
            .fetcher
            .fetch_all(&request, &normalizer, progress)
            .await?;
        let fetched = outcome.records.len();
        let records = self.pipeline.prepare(RecordOrigin::LiveFetch, outcome.records);

        let (replaced, report) = if outcome.stop == StopReason::Exhausted {
            let report = self
                .pipeline
                .replace(&CacheScope::Account(account_id.to_string()), records, progress)
                .await?;
            (true, report)
        } else {
            progress
                .log(format!(
                    "Fetch stopped early ({:?}); updating {} rows without clearing the cache",
                    outcome.stop,
                    records.len()
                ))
                .await;
            let written = self.pipeline.seed(records).await?;
            (
                false,
                ReplaceReport {
                    written,
                    ..ReplaceReport::default()
                },
            )
        };

        Ok(SyncSummary {
            account_id: account_id.to_string(),
            mode: SyncMode::Live,
            fetched,
            pages: Some(outcome.pages),
            stop: Some(outcome.stop),
            snapshot_id: None,
            replaced,
            report,
        })
    }

    /// Generate a remote snapshot, wait for it, and replace the cache with it.
    pub async fn sync_snapshot(
        &self,
        account_id: &str,
        notify_email: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<SyncSummary, AppError> {
        self.sync_snapshot_scope(
            CacheScope::Account(account_id.to_string()),
            notify_email,
            progress,
        )
        .await
    }

    /// Snapshot every account and replace the whole cache with it.
    pub async fn sync_all_accounts(
        &self,
        notify_email: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<SyncSummary, AppError> {
        self.sync_snapshot_scope(CacheScope::All, notify_email, progress)
            .await
    }

    async fn sync_snapshot_scope(
        &self,
        scope: CacheScope,
        notify_email: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<SyncSummary, AppError> {
        let account_id = match &scope {
            CacheScope::Account(id) => Some(id.as_str()),
            CacheScope::All => None,
        };

        let job = self.snapshots.submit(account_id, notify_email).await?;
        progress
            .log(format!("Snapshot {} submitted for {}", job.id, scope))
            .await;

        let finished = self.wait_snapshot(&job.id, progress).await?;
        let url = finished.download_url.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Snapshot {} has no download URL", job.id))
        })?;

        progress.log(format!("Downloading snapshot {}", job.id)).await;
        let payload = self.snapshots.download(&url).await?;
        let fetched = payload.record_count();
        let records = self.pipeline.prepare(
            RecordOrigin::Snapshot,
            payload.into_records(account_id, Utc::now()),
        );

        let report = self.pipeline.replace(&scope, records, progress).await?;

        Ok(SyncSummary {
            account_id: account_id.unwrap_or(ALL_ACCOUNTS).to_string(),
            mode: SyncMode::Snapshot,
            fetched,
            pages: None,
            stop: None,
            snapshot_id: Some(job.id),
            replaced: true,
            report,
        })
    }

    pub async fn submit_snapshot(
        &self,
        account_id: &str,
        notify_email: Option<&str>,
    ) -> Result<SnapshotJob, AppError> {
        Ok(self.snapshots.submit(Some(account_id), notify_email).await?)
    }

    /// Wait for a snapshot, registering the wait so an operator abort can
    /// interrupt it.
    async fn wait_snapshot(
        &self,
        snapshot_id: &str,
        progress: &dyn ProgressSink,
    ) -> Result<SnapshotJob, AppError> {
        let cancel = CancellationToken::new();
        self.waits.insert(snapshot_id.to_string(), cancel.clone());

        let result = self
            .snapshots
            .wait_for_completion(snapshot_id, &self.poll, &cancel, progress)
            .await;

        self.waits.remove(snapshot_id);
        result
    }

    /// Ask the remote system to abort a snapshot and, if it agrees, stop any
    /// local wait on it.
    pub async fn abort_snapshot(
        &self,
        snapshot_id: &str,
        reason: &str,
    ) -> Result<AbortOutcome, AppError> {
        let outcome = self.snapshots.abort(snapshot_id, reason).await?;
        if matches!(outcome, AbortOutcome::Aborted(_)) {
            if let Some((_, cancel)) = self.waits.remove(snapshot_id) {
                cancel.cancel();
            }
        }
        Ok(outcome)
    }

    /// Start a sync on a detached task and return its job ID immediately.
    ///
    /// [`CacheScope::All`] is only available as a snapshot sync.
    pub async fn start_refresh(
        &self,
        scope: CacheScope,
        mode: SyncMode,
        notify_email: Option<String>,
    ) -> Result<String, AppError> {
        let job_key = match &scope {
            CacheScope::Account(id) => id.clone(),
            CacheScope::All if mode == SyncMode::Snapshot => ALL_ACCOUNTS.to_string(),
            CacheScope::All => {
                return Err(AppError::BadRequest(
                    "Syncing every account requires snapshot mode".to_string(),
                ))
            }
        };

        let job_id = self.jobs.start(&job_key).await?;
        let this = self.clone();
        let id = job_id.clone();

        tokio::spawn(async move {
            let progress = this.jobs.progress(&id);
            let result = match &scope {
                CacheScope::Account(account_id) => {
                    this.sync_account(account_id, mode, notify_email.as_deref(), &progress)
                        .await
                }
                CacheScope::All => {
                    this.sync_all_accounts(notify_email.as_deref(), &progress)
                        .await
                }
            };

            let recorded = match result {
                Ok(summary) => match serde_json::to_value(&summary) {
                    Ok(value) => this.jobs.complete(&id, value).await,
                    Err(e) => this.jobs.fail(&id, format!("Failed to encode result: {}", e)).await,
                },
                Err(e) => this.jobs.fail(&id, e.to_string()).await,
            };
            if let Err(e) = recorded {
                tracing::error!(job_id = %id, error = %e, "Failed to record job outcome");
            }
        });

        Ok(job_id)
    }
}

#[async_trait]
impl AccountSync for InventorySync {
    async fn sync_account(
        &self,
        account_id: &str,
        mode: SyncMode,
        notify_email: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> Result<SyncSummary, AppError> {
        match mode {
            SyncMode::Live => self.sync_live(account_id, progress).await,
            SyncMode::Snapshot => self.sync_snapshot(account_id, notify_email, progress).await,
        }
    }

    async fn cached_rows(&self, account_id: &str) -> Result<Vec<InventoryRecord>, AppError> {
        self.pipeline.read_all(account_id).await
    }
}
