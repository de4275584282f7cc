// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduler entrypoint: due schedules run once per window.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

fn check_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/tasks/check-schedules")
        .header("x-scheduler-token", common::SCHEDULER_TOKEN)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_due_schedule_runs_once_and_records_status() {
    let server = MockServer::start().await;
    common::mount_token_endpoint(&server).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "warehouse_products": { "data": {
                "pageInfo": { "hasNextPage": false, "endCursor": null },
                "edges": [{ "node": {
                    "sku": "MUG",
                    "warehouse_identifier": "WH1",
                    "locations": { "edges": [
                        { "node": { "quantity": 2, "location": { "name": "A-01" } } }
                    ]}
                }}]
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (app, _, _) = common::create_test_app(&server);

    // Scheduled a minute ago, every day, so it is inside the window now.
    let time_of_day = (Utc::now() - Duration::minutes(1)).format("%H:%M:00").to_string();
    let response = app
        .clone()
        .oneshot(common::operator_request(
            "PUT",
            "/api/schedules/daily",
            Some(json!({
                "id": "ignored",
                "name": "Daily stock",
                "account_id": "acct",
                "email": "ops@example.com",
                "days_of_week": ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"],
                "time_of_day": time_of_day,
                "enabled": true,
                "filters": { "min_quantity": 1 }
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::body_json(response).await["id"], "daily");

    let response = app.clone().oneshot(check_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = common::body_json(response).await;
    assert_eq!(report["checked"], 1);
    assert_eq!(report["runs"][0]["schedule_id"], "daily");
    assert_eq!(report["runs"][0]["status"], "success");
    assert_eq!(report["runs"][0]["rows"], 1);

    // A second check inside the same window does nothing.
    let response = app.clone().oneshot(check_request()).await.unwrap();
    let report = common::body_json(response).await;
    assert_eq!(report["runs"].as_array().unwrap().len(), 0);

    let response = app
        .oneshot(common::operator_request("GET", "/api/schedules", None))
        .await
        .unwrap();
    let schedules = common::body_json(response).await;
    assert_eq!(schedules[0]["last_run_status"], "success");
    assert!(schedules[0]["last_run_at"].is_string());
}

#[tokio::test]
async fn test_invalid_schedule_rejected() {
    let server = MockServer::start().await;
    let (app, _, _) = common::create_test_app(&server);

    let response = app
        .oneshot(common::operator_request(
            "PUT",
            "/api/schedules/bad",
            Some(json!({
                "id": "bad",
                "name": "No email",
                "account_id": "acct",
                "email": "not-an-email",
                "days_of_week": ["Mon"],
                "time_of_day": "09:00:00",
                "enabled": true
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
