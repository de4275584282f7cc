// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::{Request, Response};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stock_mirror::config::Config;
use stock_mirror::db::{FirestoreDb, MemoryStore};
use stock_mirror::models::InventoryRecord;
use stock_mirror::routes::create_router;
use stock_mirror::services::{LogMailer, RetryPolicy};
use stock_mirror::AppState;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const OPERATOR_KEY: &str = "test_operator_key";
pub const SCHEDULER_TOKEN: &str = "test_scheduler_token";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Retry policy with millisecond delays.
#[allow(dead_code)]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryPolicy::default()
    }
}

/// Serve a long-lived access token from the mock auth endpoint.
#[allow(dead_code)]
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "test-access-token",
            "expires_in": 2_419_200
        })))
        .mount(server)
        .await;
}

/// Configuration pointing the remote client at `server`.
#[allow(dead_code)]
pub fn test_config(server: &MockServer) -> Config {
    Config {
        graphql_url: format!("{}/graphql", server.uri()),
        token_url: format!("{}/auth/refresh", server.uri()),
        ..Config::test_default()
    }
}

/// Create a test app on the in-memory store, talking to `server`.
/// Returns the router, the shared state and the store.
#[allow(dead_code)]
pub fn create_test_app(server: &MockServer) -> (axum::Router, Arc<AppState>, MemoryStore) {
    create_test_app_with(test_config(server))
}

#[allow(dead_code)]
pub fn create_test_app_with(config: Config) -> (axum::Router, Arc<AppState>, MemoryStore) {
    let store = MemoryStore::new();
    let state = Arc::new(
        AppState::new(
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(LogMailer),
            fast_retry(),
        )
        .expect("Failed to build app state"),
    );

    (create_router(state.clone()), state, store)
}

/// Build a request authenticated with the operator key.
#[allow(dead_code)]
pub fn operator_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", OPERATOR_KEY));

    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// A cache row for `account_id`.
#[allow(dead_code)]
pub fn record(account_id: &str, sku: &str, location: &str, quantity: i64) -> InventoryRecord {
    InventoryRecord {
        account_id: account_id.to_string(),
        sku: sku.to_string(),
        location_name: location.to_string(),
        quantity,
        pickable: true,
        sellable: true,
        warehouse_identifier: "WH1".to_string(),
        product_name: format!("{} product", sku),
        barcode: None,
        synced_at: Utc::now(),
    }
}
