use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use lemos_monitor::forecast::ForecastConfig;
use lemos_monitor::notify::LogNotifier;
use lemos_monitor::store::{MemoryStore, SqliteStore};
use lemos_monitor::{routes, Collaborators, Monitor, MonitorSettings};

#[derive(Debug, Deserialize)]
struct Reading {
    area_id: i64,
    methane: f64,
    co: f64,
    temperature: f64,
    humidity: f64,
    water_level: f64,
    timestamp: DateTime<Utc>,
}

/// Serve the full router on an ephemeral port and return its base URL.
async fn spawn_app() -> Result<String> {
    // ---
    let sqlite = Arc::new(SqliteStore::in_memory().await?);
    let memory = Arc::new(MemoryStore::new());
    let collaborators = Collaborators {
        readings: sqlite.clone(),
        alerts: sqlite,
        snapshots: memory,
        notifier: Arc::new(LogNotifier::default()),
    };
    let monitor = Arc::new(Monitor::new(
        MonitorSettings::default(),
        ForecastConfig::default(),
        collaborators,
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, routes::router(monitor)).await;
    });
    Ok(format!("http://{}", addr))
}

fn raw_reading(area_id: i64, hours_ago: i64, methane: f64) -> Value {
    // ---
    json!({
        "area_id": area_id,
        "methane": methane,
        "co": "12.5",
        "temperature": 120.0,
        "humidity": 55.0,
        "water_level": 30.0,
        "timestamp": (Utc::now() - Duration::hours(hours_ago)).to_rfc3339(),
    })
}

#[tokio::test]
async fn health_reports_ok() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let body: Value = Client::new()
        .get(format!("{}/health", base))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_trained"], false);
    Ok(())
}

#[tokio::test]
async fn readings_are_calibrated_stored_and_listed() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();

    let response = client
        .post(format!("{}/api/readings", base))
        .json(&raw_reading(1, 1, 450.0))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let readings: Vec<Reading> = client
        .get(format!("{}/api/readings?hours=24&area_id=1", base))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(readings.len(), 1);
    let r = &readings[0];
    assert_eq!(r.area_id, 1);
    assert_eq!(r.methane, 450.0);
    // Numeric strings are accepted and out-of-range values clamped.
    assert_eq!(r.co, 12.5);
    assert_eq!(r.temperature, 85.0);
    assert_eq!((r.humidity, r.water_level), (55.0, 30.0));
    assert!(r.timestamp < Utc::now());

    let current: Reading = client
        .get(format!("{}/api/current/1", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(current.methane, 450.0);

    let missing = client.get(format!("{}/api/current/9", base)).send().await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn invalid_reading_is_rejected() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let response = Client::new()
        .post(format!("{}/api/readings", base))
        .json(&json!({ "area_id": 1, "methane": "high", "co": 1, "temperature": 1, "humidity": 1, "water_level": 1 }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert!(body["error"].as_str().unwrap_or_default().contains("methane"));
    Ok(())
}

#[tokio::test]
async fn threshold_update_drives_alerts_and_status() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();

    let updated: Value = client
        .post(format!("{}/api/thresholds", base))
        .json(&json!({ "methane": 400.0 }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(updated["thresholds"]["methane"], 400.0);
    assert_eq!(updated["thresholds"]["co"], 50.0);

    let rejected = client
        .post(format!("{}/api/thresholds", base))
        .json(&json!({ "methane": -1.0 }))
        .send()
        .await?;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    client
        .post(format!("{}/api/readings", base))
        .json(&raw_reading(2, 0, 700.0))
        .send()
        .await?
        .error_for_status()?;

    let alerts: Vec<Value> = client
        .get(format!("{}/api/alerts?hours=24", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["type"], "methane");
    assert_eq!(alerts[0]["severity"], "high");
    assert_eq!(alerts[0]["threshold"], 400.0);

    let status: Value = client
        .get(format!("{}/api/status", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status["active_alerts"], 1);
    assert_eq!(status["system_mode"], "single-zone");
    Ok(())
}

#[tokio::test]
async fn forecast_endpoint_needs_history() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();

    let early = client
        .get(format!("{}/api/forecast/1?hours=6", base))
        .send()
        .await?;
    assert_eq!(early.status(), StatusCode::BAD_REQUEST);

    for h in (0..12).rev() {
        client
            .post(format!("{}/api/readings", base))
            .json(&raw_reading(1, h, 500.0 + 10.0 * (12 - h) as f64))
            .send()
            .await?
            .error_for_status()?;
    }

    let forecast: Value = client
        .get(format!("{}/api/forecast/1?hours=6", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(forecast["method"], "trend");
    let points = forecast["points"].as_array().cloned().unwrap_or_default();
    assert_eq!(points.len(), 6);
    assert_eq!(points[0]["confidence"], 0.5);

    let by_query: Value = client
        .get(format!("{}/api/forecast?area_id=1&hours=6", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(by_query["area_id"], 1);
    assert_eq!(by_query["points"].as_array().map(Vec::len), Some(6));

    let missing_area = client
        .get(format!("{}/api/forecast?hours=6", base))
        .send()
        .await?;
    assert_eq!(missing_area.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn oversized_hour_window_is_rejected() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();

    for path in ["api/readings", "api/alerts"] {
        let response = client
            .get(format!("{}/{}?hours={}", base, path, u32::MAX))
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await?;
        assert!(body["error"].as_str().unwrap_or_default().contains("hour limit"));
    }

    let health = client.get(format!("{}/health", base)).send().await?;
    assert_eq!(health.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn calibration_endpoint_validates_metric() -> Result<()> {
    // ---
    let base = spawn_app().await?;
    let client = Client::new();

    let factors: Value = client
        .post(format!("{}/api/calibration", base))
        .json(&json!({ "metric": "co", "factor": 2.0 }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(factors["co"], 2.0);
    assert_eq!(factors["methane"], 1.0);

    let unknown = client
        .post(format!("{}/api/calibration", base))
        .json(&json!({ "metric": "radon", "factor": 2.0 }))
        .send()
        .await?;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
