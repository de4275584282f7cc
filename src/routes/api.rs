// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Operator API routes.

use crate::db::CacheScope;
use crate::error::{AppError, Result};
use crate::models::{
    InventoryRecord, RecordOrigin, Schedule, SnapshotJob, SyncJob, SyncJobStatus, SyncMode,
};
use crate::services::AbortOutcome;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

/// Default and maximum page size for cache reads.
const DEFAULT_INVENTORY_LIMIT: usize = 100;
const MAX_INVENTORY_LIMIT: usize = 1000;

/// API routes (require the operator API key).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/refresh", post(start_refresh).get(get_refresh))
        .route("/api/inventory", get(get_inventory))
        .route("/api/inventory/seed", post(seed_inventory))
        .route("/api/snapshots", post(submit_snapshot))
        .route("/api/snapshots/{id}", get(get_snapshot))
        .route("/api/snapshots/{id}/abort", post(abort_snapshot))
        .route("/api/schedules", get(list_schedules))
        .route("/api/schedules/{id}", put(put_schedule))
}

// ─── Manual Refresh ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub account_id: String,
    /// Replace the whole cache from a snapshot of every account
    #[serde(default)]
    pub all_accounts: bool,
    #[serde(default)]
    pub mode: SyncMode,
    #[serde(default)]
    pub notify_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshStarted {
    pub job_id: String,
    pub status: &'static str,
}

/// Start a sync in the background and return its job ID.
async fn start_refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshStarted>> {
    let scope = if request.all_accounts {
        CacheScope::All
    } else if request.account_id.trim().is_empty() {
        return Err(AppError::BadRequest("account_id is required".to_string()));
    } else {
        CacheScope::Account(request.account_id)
    };

    let job_id = state
        .inventory
        .start_refresh(scope, request.mode, request.notify_email)
        .await?;

    Ok(Json(RefreshStarted {
        job_id,
        status: "started",
    }))
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub logs: Vec<String>,
    pub status: SyncJobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<SyncJob> for JobStatusResponse {
    fn from(job: SyncJob) -> Self {
        Self {
            logs: job.logs,
            status: job.status,
            result: job.result,
            error: job.error,
        }
    }
}

/// Poll a refresh job's progress.
async fn get_refresh(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobStatusResponse>> {
    let job = state
        .inventory
        .jobs()
        .get(&query.job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {}", query.job_id)))?;

    Ok(Json(job.into()))
}

// ─── Inventory Cache ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InventoryQuery {
    pub account_id: String,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct InventoryPage {
    pub account_id: String,
    pub offset: usize,
    pub limit: usize,
    pub rows: Vec<InventoryRecord>,
    /// Offset of the next page, absent on the last page
    pub next_offset: Option<usize>,
}

/// Range-paged read of one account's cached rows.
async fn get_inventory(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InventoryQuery>,
) -> Result<Json<InventoryPage>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_INVENTORY_LIMIT)
        .clamp(1, MAX_INVENTORY_LIMIT);

    let rows = state
        .store
        .select_range(&query.account_id, query.offset, limit)
        .await?;
    let next_offset = (rows.len() == limit).then_some(query.offset + limit);

    Ok(Json(InventoryPage {
        account_id: query.account_id,
        offset: query.offset,
        limit,
        rows,
        next_offset,
    }))
}

/// One row of an already-parsed manual upload.
#[derive(Debug, Deserialize)]
pub struct SeedRow {
    pub sku: String,
    pub location_name: String,
    pub quantity: i64,
    #[serde(default = "default_true")]
    pub pickable: bool,
    #[serde(default = "default_true")]
    pub sellable: bool,
    #[serde(default)]
    pub warehouse_identifier: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub barcode: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SeedRequest {
    pub account_id: String,
    pub rows: Vec<SeedRow>,
}

#[derive(Debug, Serialize)]
pub struct SeedResponse {
    pub received: usize,
    pub written: usize,
}

/// Upsert manually uploaded stock levels. Rows with no units are dropped.
async fn seed_inventory(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SeedRequest>,
) -> Result<Json<SeedResponse>> {
    if request.account_id.trim().is_empty() {
        return Err(AppError::BadRequest("account_id is required".to_string()));
    }

    let received = request.rows.len();
    let now = Utc::now();
    let records = request
        .rows
        .into_iter()
        .map(|row| InventoryRecord {
            account_id: request.account_id.clone(),
            sku: row.sku,
            location_name: row.location_name,
            quantity: row.quantity,
            pickable: row.pickable,
            sellable: row.sellable,
            warehouse_identifier: row.warehouse_identifier,
            product_name: row.product_name,
            barcode: row.barcode,
            synced_at: now,
        })
        .collect();

    let pipeline = state.inventory.pipeline();
    let records = pipeline.prepare(RecordOrigin::ManualUpload, records);
    let written = pipeline.seed(records).await?;

    tracing::info!(account_id = %request.account_id, received, written, "Manual seed applied");
    Ok(Json(SeedResponse { received, written }))
}

// ─── Snapshots ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub account_id: String,
    #[serde(default)]
    pub notify_email: Option<String>,
}

/// Submit a snapshot generation job without waiting for it.
async fn submit_snapshot(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SnapshotRequest>,
) -> Result<Json<SnapshotJob>> {
    let job = state
        .inventory
        .submit_snapshot(&request.account_id, request.notify_email.as_deref())
        .await?;
    Ok(Json(job))
}

/// Current remote status of a snapshot.
async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SnapshotJob>> {
    Ok(Json(state.inventory.snapshots().poll(&id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AbortRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AbortResponse {
    Aborted { snapshot: SnapshotJob },
    Rejected { code: String, message: String },
}

/// Abort a snapshot. A refusal from the remote side is a 409 with
/// `status: "rejected"`; the job keeps running.
async fn abort_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let request: AbortRequest = if body.is_empty() {
        AbortRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid abort request: {}", e)))?
    };
    let reason = request
        .reason
        .unwrap_or_else(|| "Aborted by operator".to_string());

    let response = match state.inventory.abort_snapshot(&id, &reason).await? {
        AbortOutcome::Aborted(snapshot) => {
            (StatusCode::OK, Json(AbortResponse::Aborted { snapshot })).into_response()
        }
        AbortOutcome::Rejected { code, message } => (
            StatusCode::CONFLICT,
            Json(AbortResponse::Rejected { code, message }),
        )
            .into_response(),
    };
    Ok(response)
}

// ─── Schedules ───────────────────────────────────────────────

async fn list_schedules(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Schedule>>> {
    Ok(Json(state.schedules.list_schedules().await?))
}

/// Create or replace a schedule. Run annotations are kept from the stored
/// copy.
async fn put_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut schedule): Json<Schedule>,
) -> Result<Json<Schedule>> {
    schedule.id = id;
    schedule
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    if let Some(existing) = state.schedules.get_schedule(&schedule.id).await? {
        schedule.last_run_at = existing.last_run_at;
        schedule.last_run_status = existing.last_run_status;
    } else {
        schedule.last_run_at = None;
        schedule.last_run_status = None;
    }

    state.schedules.put_schedule(&schedule).await?;
    tracing::info!(schedule_id = %schedule.id, "Schedule saved");
    Ok(Json(schedule))
}
