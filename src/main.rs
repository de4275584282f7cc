// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Stock-Mirror API Server
//!
//! Mirrors warehouse inventory into a cache store and runs scheduled
//! sync-and-report jobs.

use std::sync::Arc;
use stock_mirror::{
    config::Config,
    db::{CacheStore, FirestoreDb, MemoryStore, ScheduleStore},
    services::{LogMailer, RetryPolicy},
    AppState,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Stock-Mirror API");

    let (store, schedules): (Arc<dyn CacheStore>, Arc<dyn ScheduleStore>) =
        if config.uses_memory_store() {
            tracing::warn!("Using in-memory store; cache and schedules are lost on restart");
            let memory = Arc::new(MemoryStore::new());
            (memory.clone() as Arc<dyn CacheStore>, memory as Arc<dyn ScheduleStore>)
        } else {
            let db = Arc::new(FirestoreDb::new(&config.gcp_project_id).await?);
            (db.clone() as Arc<dyn CacheStore>, db as Arc<dyn ScheduleStore>)
        };

    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        schedules,
        Arc::new(LogMailer),
        RetryPolicy::default(),
    )?);

    let shutdown = CancellationToken::new();
    let ticker = config.schedule_internal_ticker.then(|| {
        tracing::info!(
            interval_secs = config.schedule_poll_interval.as_secs(),
            "Internal schedule ticker enabled"
        );
        state
            .runner
            .clone()
            .spawn_ticker(config.schedule_poll_interval, shutdown.clone())
    });

    let app = stock_mirror::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(ticker) = ticker {
        ticker.await?;
    }
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stock_mirror=debug,info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
