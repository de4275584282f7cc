// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Task handler routes for the external scheduler.
//!
//! These endpoints are called on a fixed cadence, not directly by operators.
//! They are protected by the scheduler token (see `middleware::tasks_auth`).

use crate::error::Result;
use crate::services::schedule::CheckReport;
use crate::AppState;
use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use std::sync::Arc;

/// Task handler routes (called by the scheduler).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/check-schedules", post(check_schedules))
}

/// Run every schedule due now.
///
/// Safe to call more often than the configured cadence: a schedule that
/// already ran in its window is not run again.
async fn check_schedules(State(state): State<Arc<AppState>>) -> Result<Json<CheckReport>> {
    let report = state.runner.run_due(Utc::now()).await?;

    tracing::info!(
        checked = report.checked,
        ran = report.runs.len(),
        skipped = report.skipped.len(),
        "Schedule check complete"
    );
    Ok(Json(report))
}
