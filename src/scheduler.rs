//! Recurring forecast job.
//!
//! One background task runs [`Monitor::run_forecast_cycle`] immediately on
//! start and then after every interval. A failed cycle shortens the next
//! wait to the retry delay. Stopping waits for an in-flight cycle to finish;
//! cycles are never cancelled midway.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::monitor::Monitor;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Wait after a successful cycle.
    pub interval: Duration,
    /// Wait after a failed cycle.
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retry_delay: Duration::from_secs(300),
        }
    }
}

pub struct ForecastScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ForecastScheduler {
    /// Spawn the job on the current runtime.
    pub fn start(monitor: Arc<Monitor>, config: SchedulerConfig) -> Self {
        // ---
        let (shutdown, mut stopped) = watch::channel(false);
        info!(
            "Starting forecast scheduler (interval {:?}, retry {:?})",
            config.interval, config.retry_delay
        );

        let handle = tokio::spawn(async move {
            loop {
                let wait = match monitor.run_forecast_cycle().await {
                    Ok(_) => config.interval,
                    Err(e) => {
                        error!(
                            "Error in forecast cycle: {}, retrying in {:?}",
                            e, config.retry_delay
                        );
                        config.retry_delay
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = stopped.wait_for(|stop| *stop) => break,
                }
            }
            info!("Forecast scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal shutdown and wait for the job to exit.
    pub async fn stop(self) {
        // ---
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!("Forecast scheduler task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use crate::error::StoreError;
    use crate::forecast::ForecastConfig;
    use crate::models::{Reading, Severity};
    use crate::monitor::{Collaborators, MonitorSettings};
    use crate::notify::NotificationSink;
    use crate::store::{MemoryStore, ReadingStore};

    /// Counts area listings and fails history queries for one area.
    struct FlakyStore {
        inner: MemoryStore,
        broken_area: Option<i64>,
        fail_listing: bool,
        listings: AtomicUsize,
    }

    impl FlakyStore {
        fn new(broken_area: Option<i64>, fail_listing: bool) -> Self {
            Self {
                inner: MemoryStore::new(),
                broken_area,
                fail_listing,
                listings: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReadingStore for FlakyStore {
        async fn store_reading(&self, reading: &Reading) -> Result<(), StoreError> {
            self.inner.store_reading(reading).await
        }

        async fn query_readings(
            &self,
            area_id: Option<i64>,
            since: chrono::Duration,
        ) -> Result<Vec<Reading>, StoreError> {
            if area_id.is_some() && area_id == self.broken_area {
                return Err(StoreError::Corrupt("disk on fire".into()));
            }
            self.inner.query_readings(area_id, since).await
        }

        async fn areas(&self) -> Result<Vec<i64>, StoreError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing {
                return Err(StoreError::Corrupt("listing unavailable".into()));
            }
            self.inner.areas().await
        }
    }

    struct Silent;

    #[async_trait]
    impl NotificationSink for Silent {
        async fn deliver(&self, _message: &str, _severity: Severity, _area_id: i64) {}
    }

    fn create_test_monitor(store: Arc<FlakyStore>, areas: Vec<i64>) -> Arc<Monitor> {
        // ---
        let memory = Arc::new(MemoryStore::new());
        let collaborators = Collaborators {
            readings: store,
            alerts: memory.clone(),
            snapshots: memory,
            notifier: Arc::new(Silent),
        };
        let settings = MonitorSettings {
            monitored_areas: areas,
            ..MonitorSettings::default()
        };
        Arc::new(Monitor::new(settings, ForecastConfig::default(), collaborators))
    }

    async fn ingest_hours(monitor: &Monitor, area_id: i64, count: i64) {
        // ---
        for h in (0..count).rev() {
            let raw = json!({
                "area_id": area_id,
                "methane": 400.0 + 10.0 * (count - h) as f64,
                "co": 10.0,
                "temperature": 20.0,
                "humidity": 50.0,
                "water_level": 25.0,
                "timestamp": (Utc::now() - chrono::Duration::hours(h)).to_rfc3339(),
            });
            monitor.ingest_reading(&raw).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_one_failing_area_does_not_abort_cycle() {
        // ---
        let store = Arc::new(FlakyStore::new(Some(2), false));
        let monitor = create_test_monitor(store, vec![1, 2, 3]);
        ingest_hours(&monitor, 1, 12).await;
        ingest_hours(&monitor, 3, 12).await;

        let report = monitor.run_forecast_cycle().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.evaluated, 2);
    }

    #[tokio::test]
    async fn test_cycle_fails_when_every_area_fails() {
        // ---
        let store = Arc::new(FlakyStore::new(Some(5), false));
        let monitor = create_test_monitor(store, vec![5]);

        assert!(monitor.run_forecast_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_first_cycle_runs_immediately_and_stop_returns() {
        // ---
        let store = Arc::new(FlakyStore::new(None, false));
        let monitor = create_test_monitor(store.clone(), vec![1]);
        let config = SchedulerConfig {
            interval: Duration::from_secs(3600),
            retry_delay: Duration::from_secs(3600),
        };

        let scheduler = ForecastScheduler::start(monitor, config);
        for _ in 0..100 {
            if store.listings.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.listings.load(Ordering::SeqCst), 1);

        tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
            .await
            .expect("scheduler should stop promptly");
    }

    #[tokio::test]
    async fn test_failed_cycle_uses_retry_delay() {
        // ---
        let store = Arc::new(FlakyStore::new(None, true));
        let monitor = create_test_monitor(store.clone(), vec![1]);
        let config = SchedulerConfig {
            interval: Duration::from_secs(3600),
            retry_delay: Duration::from_millis(20),
        };

        let scheduler = ForecastScheduler::start(monitor, config);
        for _ in 0..200 {
            if store.listings.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.listings.load(Ordering::SeqCst) >= 3);

        scheduler.stop().await;
    }
}
