//! Full pipeline: hourly readings with a rising methane trend crossing the
//! threshold at hour 20, and a periodic forecast issued at hour 15.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio_test::assert_ok;

use lemos_monitor::forecast::ForecastConfig;
use lemos_monitor::models::{AlertKind, Severity};
use lemos_monitor::notify::NotificationSink;
use lemos_monitor::store::{MemoryStore, ModelSnapshotStore};
use lemos_monitor::{Collaborators, Monitor, MonitorSettings};

const HOURS: i64 = 25;

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<(String, Severity, i64)>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, message: &str, severity: Severity, area_id: i64) {
        self.delivered
            .lock()
            .unwrap()
            .push((message.to_string(), severity, area_id));
    }
}

fn hourly_reading(hour: i64) -> Value {
    // ---
    json!({
        "area_id": 1,
        "methane": 400.0 + 31.0 * hour as f64,
        "co": 10.0,
        "temperature": 22.0,
        "humidity": 50.0,
        "water_level": 35.0,
        "timestamp": (Utc::now() - Duration::hours(HOURS - 1 - hour)).to_rfc3339(),
    })
}

#[tokio::test]
async fn rising_methane_warns_before_crossing() {
    // ---
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let collaborators = Collaborators {
        readings: store.clone(),
        alerts: store.clone(),
        snapshots: store.clone(),
        notifier: sink.clone(),
    };
    let settings = MonitorSettings {
        monitored_areas: vec![1],
        ..MonitorSettings::default()
    };
    let monitor = Monitor::new(settings, ForecastConfig::default(), collaborators);

    for hour in 0..15 {
        assert_ok!(monitor.ingest_reading(&hourly_reading(hour)).await);
    }
    assert!(store.alerts().await.is_empty());

    // Hour 15: untrained with fewer than 20 readings, so the trend fallback.
    let report = assert_ok!(monitor.run_forecast_cycle().await);
    assert_eq!(report.evaluated, 1);
    assert!(report.alerts_raised > 0);
    assert!(!monitor.forecaster().is_trained());

    let warnings = store.alerts().await;
    assert!(warnings.iter().all(|a| a.kind == AlertKind::ForecastWarning));
    assert!(warnings.iter().all(|a| a.severity == Severity::Medium));
    let earliest = warnings
        .iter()
        .filter_map(|a| a.predicted_values)
        .map(|v| v.methane)
        .fold(f64::INFINITY, f64::min);
    assert!(earliest > 1000.0);

    for hour in 15..HOURS {
        assert_ok!(monitor.ingest_reading(&hourly_reading(hour)).await);
    }

    let current: Vec<_> = store
        .alerts()
        .await
        .into_iter()
        .filter(|a| a.kind == AlertKind::Methane)
        .collect();
    // 400 + 31 * 20 = 1020 is the first reading above 1000.
    assert_eq!(current.len(), 5);
    assert_eq!(current[0].value, Some(1020.0));
    assert!(current.iter().all(|a| a.severity == Severity::Medium));

    let delivered = sink.delivered.lock().unwrap().len();
    assert_eq!(delivered, store.alerts().await.len());

    // With 25 readings the next forecast trains and persists a model.
    assert_ok!(monitor.run_forecast_cycle().await);
    assert!(monitor.forecaster().is_trained());
    let snapshot = assert_ok!(store.load().await);
    assert_eq!(snapshot.map(|m| m.training_readings), Some(HOURS as usize));
}
