// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod api;
pub mod tasks;

use crate::middleware::{require_auth, require_tasks_auth, security::add_security_headers};
use crate::AppState;
use axum::http::{header, request::Parts, HeaderValue, Method};
use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub build_id: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        build_id: option_env!("BUILD_ID").unwrap_or("unknown"),
    })
}

/// CORS for the operator console, plus localhost during development.
fn cors_layer(frontend_url: String) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
            origin.to_str().is_ok_and(|origin| {
                origin == frontend_url
                    || origin.starts_with("http://localhost")
                    || origin.starts_with("http://127.0.0.1")
            })
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
}

/// Build the complete router with all routes.
///
/// - `/health` is public
/// - `/api/*` requires the operator API key
/// - `/tasks/*` requires the scheduler token
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes =
        api::routes().route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
    let task_routes = tasks::routes()
        .route_layer(middleware::from_fn_with_state(state.clone(), require_tasks_auth));

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes)
        .merge(task_routes)
        .layer(middleware::from_fn(add_security_headers))
        .layer(cors_layer(state.config.frontend_url.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
