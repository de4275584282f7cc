// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Remote inventory snapshots: submit, poll, download, abort.
//!
//! Snapshot generation runs on the remote side and can take many minutes.
//! Nothing about a job is kept locally; its state is always re-read from the
//! remote snapshot ID, so polling can resume from a fresh process.

use crate::error::{AppError, RemoteError};
use crate::models::{InventoryRecord, SnapshotJob, SnapshotStatus};
use crate::services::graphql::{GraphqlClient, RetryPolicy};
use crate::services::jobs::ProgressSink;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Remote error code returned when a job is too far along to abort.
pub const ABORT_REJECTED_CODE: &str = "9";

/// Attempts for the result download (the job itself is already complete).
const DOWNLOAD_ATTEMPTS: u32 = 3;

const SNAPSHOT_FIELDS: &str = r#"
    snapshot_id
    job_id
    status
    error
    created_at
    snapshot_url
    customer_account_id
    notification_email
"#;

/// Poll loop parameters.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Polls before the job is declared timed out
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_polls: 60,
        }
    }
}

/// Result of an abort request.
#[derive(Debug, Clone)]
pub enum AbortOutcome {
    /// The remote accepted the abort.
    Aborted(SnapshotJob),
    /// The remote refused; the job keeps running and must be waited out.
    Rejected { code: String, message: String },
}

#[derive(Debug, Deserialize)]
struct RemoteSnapshot {
    snapshot_id: String,
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    snapshot_url: Option<String>,
    #[serde(default)]
    customer_account_id: Option<String>,
    #[serde(default)]
    notification_email: Option<String>,
}

impl RemoteSnapshot {
    fn into_job(self) -> SnapshotJob {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        SnapshotJob {
            id: self.snapshot_id,
            account_id: self.customer_account_id.unwrap_or_default(),
            notify_email: self.notification_email,
            status: SnapshotStatus::from_remote(&self.status),
            download_url: self.snapshot_url.filter(|url| !url.is_empty()),
            error: self.error.filter(|e| !e.is_empty()),
            created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    snapshot: RemoteSnapshot,
}

#[derive(Debug, Deserialize)]
struct GenerateData {
    inventory_generate_snapshot: SnapshotEnvelope,
}

#[derive(Debug, Deserialize)]
struct PollData {
    inventory_snapshot: SnapshotEnvelope,
}

#[derive(Debug, Deserialize)]
struct AbortData {
    inventory_abort_snapshot: SnapshotEnvelope,
}

/// Downloaded snapshot body.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotPayload {
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub warehouses: BTreeMap<String, SnapshotWarehouse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotWarehouse {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub products: BTreeMap<String, SnapshotProduct>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotProduct {
    #[serde(default)]
    pub sku: Option<String>,
    /// Owning customer account. Only present in snapshots generated for
    /// every account.
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub item_bins: BTreeMap<String, SnapshotBin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotBin {
    #[serde(default)]
    pub quantity: i64,
    #[serde(default = "default_true")]
    pub pickable: bool,
    #[serde(default = "default_true")]
    pub sellable: bool,
}

fn default_true() -> bool {
    true
}

impl SnapshotPayload {
    /// Number of bin rows the payload holds.
    pub fn record_count(&self) -> usize {
        self.warehouses
            .values()
            .flat_map(|w| w.products.values())
            .map(|p| p.item_bins.len())
            .sum()
    }

    /// Flatten into cache rows.
    ///
    /// With `account_id` set every row belongs to that account. Without it
    /// rows take the product's own account, and products that name none come
    /// out with an empty account (rejected later by validation).
    pub fn into_records(
        self,
        account_id: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Vec<InventoryRecord> {
        let mut records = Vec::with_capacity(self.record_count());
        for (warehouse_key, warehouse) in self.warehouses {
            let warehouse_identifier = warehouse.identifier.unwrap_or(warehouse_key);
            for (sku_key, product) in warehouse.products {
                let sku = product.sku.unwrap_or(sku_key);
                let owner = account_id
                    .map(str::to_string)
                    .or(product.account_id)
                    .unwrap_or_default();
                for (location_name, bin) in product.item_bins {
                    records.push(InventoryRecord {
                        account_id: owner.clone(),
                        sku: sku.clone(),
                        location_name,
                        quantity: bin.quantity.max(0),
                        pickable: bin.pickable,
                        sellable: bin.sellable,
                        warehouse_identifier: warehouse_identifier.clone(),
                        product_name: product.name.clone().unwrap_or_default(),
                        barcode: product.barcode.clone(),
                        synced_at,
                    });
                }
            }
        }
        records
    }
}

/// Drives the remote snapshot workflow.
#[derive(Clone)]
pub struct SnapshotController {
    client: GraphqlClient,
}

impl SnapshotController {
    pub fn new(client: GraphqlClient) -> Self {
        Self { client }
    }

    /// Ask the remote system to start generating a snapshot of one account,
    /// or of every account when `account_id` is `None`.
    pub async fn submit(
        &self,
        account_id: Option<&str>,
        notify_email: Option<&str>,
    ) -> Result<SnapshotJob, RemoteError> {
        let document = format!(
            "mutation GenerateSnapshot($data: InventoryGenerateSnapshotInput!) {{
                inventory_generate_snapshot(data: $data) {{
                    request_id
                    complexity
                    snapshot {{ {} }}
                }}
            }}",
            SNAPSHOT_FIELDS
        );
        let variables = serde_json::json!({
            "data": {
                "customer_account_id": account_id,
                "notification_email": notify_email,
            }
        });

        let data: GenerateData = self.client.execute(&document, variables).await?;
        let mut job = data.inventory_generate_snapshot.snapshot.into_job();
        if job.account_id.is_empty() {
            job.account_id = account_id.unwrap_or_default().to_string();
        }
        if job.notify_email.is_none() {
            job.notify_email = notify_email.map(str::to_string);
        }

        tracing::info!(
            snapshot_id = %job.id,
            account_id = account_id.unwrap_or("*"),
            "Snapshot generation submitted"
        );
        Ok(job)
    }

    /// Read the current status of a snapshot job.
    pub async fn poll(&self, snapshot_id: &str) -> Result<SnapshotJob, RemoteError> {
        let document = format!(
            "query Snapshot($snapshot_id: String!) {{
                inventory_snapshot(snapshot_id: $snapshot_id) {{
                    request_id
                    complexity
                    snapshot {{ {} }}
                }}
            }}",
            SNAPSHOT_FIELDS
        );
        let data: PollData = self
            .client
            .execute(&document, serde_json::json!({ "snapshot_id": snapshot_id }))
            .await?;
        Ok(data.inventory_snapshot.snapshot.into_job())
    }

    /// Request cancellation of a running job.
    ///
    /// Sent once: a refusal (code 9) is reported as
    /// [`AbortOutcome::Rejected`], not as an error.
    pub async fn abort(&self, snapshot_id: &str, reason: &str) -> Result<AbortOutcome, RemoteError> {
        let document = format!(
            "mutation AbortSnapshot($data: InventoryAbortSnapshotInput!) {{
                inventory_abort_snapshot(data: $data) {{
                    request_id
                    complexity
                    snapshot {{ {} }}
                }}
            }}",
            SNAPSHOT_FIELDS
        );
        let variables = serde_json::json!({
            "data": { "snapshot_id": snapshot_id, "reason": reason }
        });

        match self.client.execute_once::<AbortData>(&document, variables).await {
            Ok(data) => {
                tracing::info!(snapshot_id, "Snapshot aborted");
                Ok(AbortOutcome::Aborted(
                    data.inventory_abort_snapshot.snapshot.into_job(),
                ))
            }
            Err(err) if err.code() == Some(ABORT_REJECTED_CODE) => {
                tracing::info!(snapshot_id, message = err.message(), "Snapshot abort rejected");
                Ok(AbortOutcome::Rejected {
                    code: ABORT_REJECTED_CODE.to_string(),
                    message: err.message().to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Poll until the job reaches a terminal state.
    ///
    /// Cancelling `cancel` interrupts the wait immediately. Running out of
    /// polls yields [`AppError::Timeout`], distinct from a remote-reported
    /// failure.
    pub async fn wait_for_completion(
        &self,
        snapshot_id: &str,
        settings: &PollSettings,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<SnapshotJob, AppError> {
        let cancelled = || AppError::Aborted(format!("Snapshot {} wait cancelled", snapshot_id));

        for attempt in 1..=settings.max_polls {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                polled = self.poll(snapshot_id) => polled?,
            };
            progress
                .log(format!(
                    "Snapshot {} is {:?} (poll {}/{})",
                    snapshot_id, job.status, attempt, settings.max_polls
                ))
                .await;

            match job.status {
                SnapshotStatus::Success => {
                    if job.download_url.is_none() {
                        return Err(RemoteError::system(format!(
                            "Snapshot {} finished without a download URL",
                            snapshot_id
                        ))
                        .into());
                    }
                    return Ok(job);
                }
                SnapshotStatus::Error => {
                    return Err(RemoteError::system(format!(
                        "Snapshot {} failed: {}",
                        snapshot_id,
                        job.error.as_deref().unwrap_or("unknown error")
                    ))
                    .into());
                }
                SnapshotStatus::Aborted => {
                    return Err(AppError::Aborted(format!(
                        "Snapshot {} was aborted",
                        snapshot_id
                    )));
                }
                SnapshotStatus::Pending | SnapshotStatus::Processing => {}
            }

            if attempt < settings.max_polls {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled()),
                    _ = tokio::time::sleep(settings.interval) => {}
                }
            }
        }

        Err(AppError::Timeout(format!(
            "Snapshot {} not ready after {} polls",
            snapshot_id, settings.max_polls
        )))
    }

    /// Fetch and parse a completed snapshot.
    pub async fn download(&self, url: &str) -> Result<SnapshotPayload, RemoteError> {
        let policy = RetryPolicy {
            max_retries: DOWNLOAD_ATTEMPTS - 1,
            ..self.client.retry_policy().clone()
        };

        let mut attempt = 0;
        loop {
            match self.download_once(url).await {
                Ok(payload) => return Ok(payload),
                Err((err, retryable)) => {
                    if !retryable || attempt >= policy.max_retries {
                        return Err(err);
                    }
                    let delay = policy.delay_with_jitter(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying snapshot download"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn download_once(&self, url: &str) -> Result<SnapshotPayload, (RemoteError, bool)> {
        let response = self.client.http().get(url).send().await.map_err(|e| {
            (
                RemoteError::system(format!("Snapshot download failed: {}", e)),
                true,
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err((
                RemoteError::System {
                    message: format!("Snapshot download returned HTTP {}", status),
                    code: Some(status.as_u16().to_string()),
                },
                status.is_server_error(),
            ));
        }

        let bytes = response.bytes().await.map_err(|e| {
            (
                RemoteError::system(format!("Snapshot download interrupted: {}", e)),
                true,
            )
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            (
                RemoteError::system(format!("Snapshot payload is not valid JSON: {}", e)),
                false,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::jobs::LogProgress;
    use crate::services::token::StaticToken;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn controller(server: &MockServer) -> SnapshotController {
        SnapshotController::new(GraphqlClient::new(
            reqwest::Client::new(),
            format!("{}/graphql", server.uri()),
            Arc::new(StaticToken("t".into())),
            RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                ..RetryPolicy::default()
            },
        ))
    }

    fn fast_poll() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            max_polls: 5,
        }
    }

    fn snapshot_body(field: &str, status: &str, url: Option<&str>) -> serde_json::Value {
        json!({
            "data": {
                field: {
                    "request_id": "r1",
                    "complexity": 1,
                    "snapshot": {
                        "snapshot_id": "snap-1",
                        "job_id": "job-1",
                        "status": status,
                        "error": null,
                        "created_at": "2026-10-19T12:00:00+00:00",
                        "snapshot_url": url,
                        "customer_account_id": "acct"
                    }
                }
            }
        })
    }

    #[test]
    fn payload_flattens_bins() {
        let payload: SnapshotPayload = serde_json::from_value(json!({
            "snapshot_id": "snap-1",
            "warehouses": {
                "V2FyZWhvdXNlOjE=": {
                    "identifier": "Primary",
                    "products": {
                        "MUG": {
                            "name": "Mug",
                            "item_bins": {
                                "A-01": { "quantity": 4, "pickable": true, "sellable": true },
                                "B-02": { "quantity": -2, "pickable": false, "sellable": true }
                            }
                        },
                        "CUP": { "item_bins": { "A-02": { "quantity": 0 } } }
                    }
                }
            }
        }))
        .unwrap();

        assert_eq!(payload.record_count(), 3);
        let records = payload.into_records(Some("acct"), Utc::now());
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.warehouse_identifier == "Primary"));
        let b02 = records.iter().find(|r| r.location_name == "B-02").unwrap();
        assert_eq!(b02.quantity, 0);
        assert!(!b02.pickable);
        let cup = records.iter().find(|r| r.sku == "CUP").unwrap();
        assert!(cup.pickable && cup.sellable);
    }

    #[tokio::test]
    async fn submit_returns_remote_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("inventory_generate_snapshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body(
                "inventory_generate_snapshot",
                "enqueued",
                None,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let job = controller(&server)
            .submit(Some("acct"), Some("ops@example.com"))
            .await
            .unwrap();

        assert_eq!(job.id, "snap-1");
        assert_eq!(job.status, SnapshotStatus::Pending);
        assert_eq!(job.notify_email.as_deref(), Some("ops@example.com"));
        assert!(job.created_at.is_some());
    }

    #[tokio::test]
    async fn wait_times_out_after_max_polls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("inventory_snapshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body(
                "inventory_snapshot",
                "processing",
                None,
            )))
            .expect(5)
            .mount(&server)
            .await;

        let err = controller(&server)
            .wait_for_completion("snap-1", &fast_poll(), &CancellationToken::new(), &LogProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn remote_error_is_distinct_from_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body(
                "inventory_snapshot",
                "error",
                None,
            )))
            .mount(&server)
            .await;

        let err = controller(&server)
            .wait_for_completion("snap-1", &fast_poll(), &CancellationToken::new(), &LogProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Remote(RemoteError::System { .. })));
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_body(
                "inventory_snapshot",
                "processing",
                None,
            )))
            .mount(&server)
            .await;

        let settings = PollSettings {
            interval: Duration::from_secs(3600),
            max_polls: 60,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let controller = controller(&server);
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            controller.wait_for_completion("snap-1", &settings, &cancel, &LogProgress),
        )
        .await
        .expect("cancellation should interrupt the sleep")
        .unwrap_err();
        assert!(matches!(err, AppError::Aborted(_)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_slow_poll() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(700)))
            .mount(&server)
            .await;

        // Default backoff: a poll that keeps failing takes seconds to give up.
        let controller = SnapshotController::new(GraphqlClient::new(
            reqwest::Client::new(),
            format!("{}/graphql", server.uri()),
            Arc::new(StaticToken("t".into())),
            RetryPolicy::default(),
        ));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = controller
            .wait_for_completion("snap-1", &PollSettings::default(), &cancel, &LogProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Aborted(_)), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[test]
    fn unscoped_payload_keeps_product_accounts() {
        let payload: SnapshotPayload = serde_json::from_value(json!({
            "warehouses": {
                "W1": {
                    "products": {
                        "MUG": { "account_id": "acct-a", "item_bins": { "A-01": { "quantity": 1 } } },
                        "CUP": { "account_id": "acct-b", "item_bins": { "A-02": { "quantity": 2 } } }
                    }
                }
            }
        }))
        .unwrap();

        let unscoped = payload.clone().into_records(None, Utc::now());
        let owner = |records: &[InventoryRecord], sku: &str| {
            records.iter().find(|r| r.sku == sku).unwrap().account_id.clone()
        };
        assert_eq!(owner(&unscoped, "MUG"), "acct-a");
        assert_eq!(owner(&unscoped, "CUP"), "acct-b");

        let scoped = payload.into_records(Some("acct-c"), Utc::now());
        assert!(scoped.iter().all(|r| r.account_id == "acct-c"));
    }

    #[tokio::test]
    async fn abort_rejection_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("inventory_abort_snapshot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{
                    "message": "The snapshot can no longer be aborted",
                    "extensions": { "code": 9 }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = controller(&server)
            .abort("snap-1", "operator request")
            .await
            .unwrap();
        match outcome {
            AbortOutcome::Rejected { code, .. } => assert_eq!(code, "9"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn download_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/snap.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/snap.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "warehouses": {} })))
            .expect(1)
            .mount(&server)
            .await;

        let payload = controller(&server)
            .download(&format!("{}/snap.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(payload.record_count(), 0);
    }

    #[tokio::test]
    async fn download_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expired.json"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = controller(&server)
            .download(&format!("{}/expired.json", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("403"));
    }
}
