#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use alertd_server::app;
use alertd_server::config::ServerConfig;
use alertd_server::state::AppState;
use alertd_storage::AlertStore;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub async fn build_test_context() -> Result<TestContext> {
    alertd_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let db_url = AlertStore::sqlite_url(temp_dir.path());
    let store = AlertStore::new(&db_url, temp_dir.path()).await?;

    let mut config = ServerConfig::default();
    config.database.data_dir = temp_dir.path().to_string_lossy().to_string();

    let state = AppState {
        store: Arc::new(store),
        start_time: Utc::now(),
        config: Arc::new(config),
    };

    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Value,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

/// Register a machine through the API and return its ID (decimal string).
pub async fn register_machine(app: &axum::Router, name: &str) -> String {
    let (status, body, _) = request_json(
        app,
        "POST",
        "/v1/machines",
        json!({ "machineId": name, "ipAddress": "10.0.0.1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register machine failed: {body}");
    body["data"]["id"]
        .as_str()
        .expect("machine id should be a string")
        .to_string()
}

pub fn alert_body(machine_id: &str, scenario: &str, scope: &str, value: &str) -> Value {
    json!({
        "machineId": machine_id,
        "scenario": scenario,
        "bucketId": "bucket-1",
        "message": format!("{value} performed '{scenario}'"),
        "eventCount": 6,
        "startedAt": "2026-01-02T10:00:00Z",
        "stoppedAt": "2026-01-02T10:00:05Z",
        "capacity": 5,
        "leakSpeed": 10,
        "source": {
            "scope": scope,
            "value": value,
            "ip": value,
            "as_number": "64500",
            "country": "FR",
            "latitude": 48.85,
            "longitude": 2.35
        },
        "events": [
            { "time": "2026-01-02T10:00:01Z", "serialized": "{\"log\":\"failed password\"}" },
            { "time": "2026-01-02T10:00:02Z", "serialized": "{\"log\":\"failed password again\"}" }
        ],
        "metas": [
            { "key": "target_user", "value": "root" }
        ],
        "decisions": [
            {
                "until": "2026-01-02T14:00:05Z",
                "scenario": scenario,
                "decisionType": "ban",
                "sourceIpStart": 3232235777i64,
                "sourceIpEnd": 3232235777i64,
                "sourceValue": value,
                "sourceScope": scope
            }
        ]
    })
}

pub fn assert_err_envelope(body: &Value, err_code: i64) {
    assert_eq!(body["err_code"], err_code, "unexpected envelope: {body}");
    assert!(body["error"].is_string(), "missing error message: {body}");
    assert!(body["trace_id"].is_string(), "missing trace id: {body}");
}
