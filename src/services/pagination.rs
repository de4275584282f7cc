// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cursor-paginated fetch over a GraphQL connection.
//!
//! Pages are requested strictly in cursor order with a pacing delay between
//! them, because the API meters complexity credits per call. A credits
//! shortfall pauses for a longer cooldown and re-requests the same page.
//! A fetch stops early at the page safety limit or when the optional
//! wall-clock budget is nearly spent.

use crate::error::RemoteError;
use crate::services::graphql::GraphqlClient;
use crate::services::jobs::ProgressSink;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Turns one connection node into zero or more output items.
pub trait Normalizer: Send + Sync {
    type Item: Send;

    fn normalize(&self, node: &serde_json::Value) -> Vec<Self::Item>;
}

/// What to fetch.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// GraphQL document taking `$first` and `$after`
    pub document: String,
    /// Variables besides `first`/`after`
    pub variables: serde_json::Value,
    /// JSON pointer to the connection inside `data`, e.g. `/warehouse_products/data`
    pub connection_path: String,
    pub page_size: u32,
}

/// Pacing and safety bounds for one fetch session.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub page_delay: Duration,
    pub credit_cooldown: Duration,
    pub max_pages: u32,
    /// Consecutive credit cooldowns tolerated on one page
    pub max_credit_waits: u32,
    /// Wall-clock budget for the whole fetch
    pub budget: Option<Duration>,
    /// Time kept in reserve before the budget runs out
    pub deadline_margin: Duration,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_secs(1),
            credit_cooldown: Duration::from_secs(3),
            max_pages: 500,
            max_credit_waits: 20,
            budget: None,
            deadline_margin: Duration::from_secs(10),
        }
    }
}

/// Why a fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The connection reported no further pages.
    Exhausted,
    /// The page safety limit was reached.
    PageLimit,
    /// The wall-clock budget left no room for another page.
    Deadline,
}

#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub records: Vec<T>,
    pub pages: u32,
    pub stop: StopReason,
    pub elapsed: Duration,
}

impl<T> FetchOutcome<T> {
    /// Whether every page of the connection was read.
    pub fn is_complete(&self) -> bool {
        self.stop == StopReason::Exhausted
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: serde_json::Value,
}

/// Drives a [`GraphqlClient`] across a cursor-based connection.
#[derive(Clone)]
pub struct PageFetcher {
    client: GraphqlClient,
    limits: FetchLimits,
}

impl PageFetcher {
    pub fn new(client: GraphqlClient, limits: FetchLimits) -> Self {
        Self { client, limits }
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }

    /// Fetch every page of `request`, normalizing edges as they arrive.
    ///
    /// Each call starts a fresh cursor session from the first page. Any
    /// non-recoverable error aborts the fetch and discards accumulated items.
    pub async fn fetch_all<N: Normalizer>(
        &self,
        request: &PageRequest,
        normalizer: &N,
        progress: &dyn ProgressSink,
    ) -> Result<FetchOutcome<N::Item>, RemoteError> {
        let started = Instant::now();
        let deadline = self.limits.budget.map(|budget| started + budget);

        let mut records = Vec::new();
        let mut pages: u32 = 0;
        let mut cursor: Option<String> = None;
        let mut has_next = true;
        let mut credit_waits: u32 = 0;
        // Pacing delay or credit cooldown owed before the next request.
        let mut wait = Duration::ZERO;

        while has_next && pages < self.limits.max_pages {
            if let Some(deadline) = deadline {
                if Instant::now() + wait + self.limits.deadline_margin >= deadline {
                    progress
                        .log(format!(
                            "Stopping after {} pages: execution budget nearly spent ({} records kept)",
                            pages,
                            records.len()
                        ))
                        .await;
                    return Ok(FetchOutcome {
                        records,
                        pages,
                        stop: StopReason::Deadline,
                        elapsed: started.elapsed(),
                    });
                }
            }

            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let mut variables = request.variables.clone();
            variables["first"] = serde_json::json!(request.page_size);
            variables["after"] = serde_json::json!(cursor);

            let data: serde_json::Value =
                match self.client.execute(&request.document, variables).await {
                    Ok(data) => data,
                    Err(err) if err.is_credit_shortfall() => {
                        credit_waits += 1;
                        if credit_waits > self.limits.max_credit_waits {
                            return Err(err);
                        }
                        let cooldown = match &err {
                            RemoteError::RateLimit {
                                retry_after: Some(hint),
                                ..
                            } => self.limits.credit_cooldown.max(*hint),
                            _ => self.limits.credit_cooldown,
                        };
                        progress
                            .log(format!(
                                "Out of API credits before page {}, waiting {:.1}s",
                                pages + 1,
                                cooldown.as_secs_f64()
                            ))
                            .await;
                        wait = cooldown;
                        continue;
                    }
                    Err(err) => return Err(err),
                };
            credit_waits = 0;

            let connection = data
                .pointer(&request.connection_path)
                .cloned()
                .ok_or_else(|| {
                    RemoteError::system(format!(
                        "Response has no connection at {}",
                        request.connection_path
                    ))
                })?;
            let connection: Connection = serde_json::from_value(connection)
                .map_err(|e| RemoteError::system(format!("Malformed connection: {}", e)))?;

            let before = records.len();
            for edge in &connection.edges {
                records.extend(normalizer.normalize(&edge.node));
            }
            pages += 1;
            wait = self.limits.page_delay;

            progress
                .log(format!(
                    "Page {}: {} records (total {}, {:.1}s elapsed)",
                    pages,
                    records.len() - before,
                    records.len(),
                    started.elapsed().as_secs_f64()
                ))
                .await;

            has_next = connection.page_info.has_next_page;
            cursor = connection.page_info.end_cursor;
            if has_next && cursor.is_none() {
                return Err(RemoteError::system(
                    "Connection reports more pages but no end cursor",
                ));
            }
        }

        let stop = if has_next {
            tracing::warn!(pages, "Page safety limit reached before end of connection");
            StopReason::PageLimit
        } else {
            StopReason::Exhausted
        };

        Ok(FetchOutcome {
            records,
            pages,
            stop,
            elapsed: started.elapsed(),
        })
    }
}
