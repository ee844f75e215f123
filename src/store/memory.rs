use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::RwLock;

use super::{window_start, AlertStore, ModelSnapshotStore, ReadingStore};
use crate::error::StoreError;
use crate::forecast::TrainedModel;
use crate::models::{Alert, Reading};

// ---

/// Volatile store for tests and for running without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: RwLock<Vec<Reading>>,
    alerts: RwLock<Vec<Alert>>,
    model: RwLock<Option<TrainedModel>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored reading in insertion order.
    pub async fn readings(&self) -> Vec<Reading> {
        self.readings.read().await.clone()
    }

    /// Every stored alert in insertion order.
    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn store_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        self.readings.write().await.push(reading.clone());
        Ok(())
    }

    async fn query_readings(
        &self,
        area_id: Option<i64>,
        since: Duration,
    ) -> Result<Vec<Reading>, StoreError> {
        // ---
        let cutoff = window_start(since);
        let mut matching: Vec<Reading> = self
            .readings
            .read()
            .await
            .iter()
            .filter(|r| area_id.map_or(true, |a| r.area_id == a) && r.timestamp >= cutoff)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        matching.sort_by_key(|r| r.timestamp);
        Ok(matching)
    }

    async fn areas(&self) -> Result<Vec<i64>, StoreError> {
        // ---
        let mut areas: Vec<i64> = self.readings.read().await.iter().map(|r| r.area_id).collect();
        areas.sort_unstable();
        areas.dedup();
        Ok(areas)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn store_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }

    async fn recent_alerts(&self, since: Duration) -> Result<Vec<Alert>, StoreError> {
        // ---
        let cutoff = window_start(since);
        let mut recent: Vec<Alert> = self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .cloned()
            .collect();
        recent.reverse();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(recent)
    }
}

#[async_trait]
impl ModelSnapshotStore for MemoryStore {
    async fn save(&self, model: &TrainedModel) -> Result<(), StoreError> {
        *self.model.write().await = Some(model.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<TrainedModel>, StoreError> {
        Ok(self.model.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Utc;

    use crate::models::{AlertKind, Severity};

    fn create_test_reading(area_id: i64, minutes_ago: i64) -> Reading {
        // ---
        Reading {
            area_id,
            methane: 500.0,
            co: 10.0,
            temperature: 20.0,
            humidity: 45.0,
            water_level: 15.0,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_query_sorts_and_filters() {
        // ---
        let store = MemoryStore::new();
        store.store_reading(&create_test_reading(2, 5)).await.unwrap();
        store.store_reading(&create_test_reading(1, 30)).await.unwrap();
        store.store_reading(&create_test_reading(1, 10)).await.unwrap();
        store.store_reading(&create_test_reading(1, 600)).await.unwrap();

        let area_one = store.query_readings(Some(1), Duration::hours(1)).await.unwrap();
        assert_eq!(area_one.len(), 2);
        assert!(area_one[0].timestamp < area_one[1].timestamp);

        assert_eq!(store.query_readings(None, Duration::hours(24)).await.unwrap().len(), 4);
        assert_eq!(store.areas().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_alerts_newest_first() {
        // ---
        let store = MemoryStore::new();
        for minutes_ago in [30, 5, 60] {
            let alert = Alert::current(
                AlertKind::Methane,
                1,
                1200.0,
                1000.0,
                Severity::Medium,
                Utc::now() - Duration::minutes(minutes_ago),
            );
            store.store_alert(&alert).await.unwrap();
        }

        let recent = store.recent_alerts(Duration::minutes(45)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp > recent[1].timestamp);
        assert_eq!(store.alerts().await.len(), 3);
    }

    #[tokio::test]
    async fn test_oversized_window_returns_everything() {
        // ---
        let store = MemoryStore::new();
        store.store_reading(&create_test_reading(1, 10)).await.unwrap();
        store
            .store_alert(&Alert::current(
                AlertKind::Co,
                1,
                80.0,
                50.0,
                Severity::High,
                Utc::now(),
            ))
            .await
            .unwrap();

        let window = Duration::hours(i64::from(u32::MAX));
        assert_eq!(store.query_readings(Some(1), window).await.unwrap().len(), 1);
        assert_eq!(store.recent_alerts(window).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_snapshot_loads_none() {
        // ---
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
    }
}
