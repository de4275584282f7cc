// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Stock-Mirror: mirror warehouse inventory into a local cache
//!
//! This crate provides the sync service that pulls inventory from a
//! rate-limited, credit-metered GraphQL API into a cache store, keeps it
//! current on operator-defined schedules, and hands filtered reports to a
//! mailer.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::{CacheStore, ScheduleStore};
use services::{
    GraphqlClient, InventorySync, JobRegistry, MemoryJobStore, ReportMailer, RetryPolicy,
    ScheduleRunner, SyncPipeline, TokenManager,
};
use std::sync::Arc;
use std::time::Duration;

/// Timeout for any single outbound HTTP request.
const HTTP_TIMEOUT_SECS: u64 = 60;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CacheStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub inventory: InventorySync,
    pub runner: ScheduleRunner,
}

impl AppState {
    /// Wire the remote client, sync services and schedule runner together.
    pub fn new(
        config: Config,
        store: Arc<dyn CacheStore>,
        schedules: Arc<dyn ScheduleStore>,
        mailer: Arc<dyn ReportMailer>,
        retry: RetryPolicy,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;

        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            config.token_url.clone(),
            config.refresh_token.clone(),
        ));
        let client = GraphqlClient::new(http, config.graphql_url.clone(), tokens, retry);

        let jobs = JobRegistry::new(Arc::new(MemoryJobStore::default()), config.job_retention);
        let pipeline = SyncPipeline::new(store.clone(), config.insert_chunk_size);
        let inventory = InventorySync::new(client, pipeline, jobs, &config);

        let runner = ScheduleRunner::new(
            schedules.clone(),
            Arc::new(inventory.clone()),
            mailer,
            config.schedule_tolerance,
            config.schedule_timezone,
        );

        Ok(Self {
            config,
            store,
            schedules,
            inventory,
            runner,
        })
    }
}
