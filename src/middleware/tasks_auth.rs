// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduler authentication middleware.

use crate::middleware::auth::secrets_match;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Header carrying the shared secret of the external scheduler.
pub const SCHEDULER_TOKEN_HEADER: &str = "x-scheduler-token";

/// Require the scheduler token for `/tasks/*` routes.
pub async fn require_tasks_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = request
        .headers()
        .get(SCHEDULER_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());

    let valid = presented
        .map(|token| secrets_match(token, &state.config.scheduler_token))
        .unwrap_or(false);

    if !valid {
        tracing::warn!(
            present = presented.is_some(),
            path = %request.uri().path(),
            "Blocked tasks request with missing or invalid scheduler token"
        );
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}
