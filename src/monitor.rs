//! The monitoring core: ingestion, forecasting and alert dispatch.
//!
//! [`Monitor`] ties the pure pieces (calibration, features, forecasting,
//! alert evaluation) to the collaborators they need (stores and the
//! notification sink). Two paths drive it:
//!
//! - the immediate path, [`Monitor::ingest_reading`], run per incoming
//!   payload, which only evaluates current values;
//! - the periodic path, [`Monitor::run_forecast_cycle`], run by the
//!   scheduler, which forecasts every monitored area.
//!
//! Shared state is only touched through its atomic operations and no lock is
//! held across collaborator I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::alerts::{evaluate_current, evaluate_forecast, AlertDeduplicator, ForecastWarningMode};
use crate::calibration::{expand_zones, CalibrationFactors, Calibrator};
use crate::error::{MonitorError, Result, ValidationError};
use crate::forecast::{Forecast, ForecastConfig, ForecastMethod, Forecaster};
use crate::models::{Alert, ForecastPoint, Metric, Reading, ThresholdUpdate, Thresholds};
use crate::notify::NotificationSink;
use crate::state::{LatestReadings, ThresholdTable};
use crate::store::{AlertStore, ModelSnapshotStore, ReadingStore};

// ---

/// Longest look-back accepted by the history and alert queries.
pub const MAX_QUERY_WINDOW_HOURS: u32 = 24 * 365 * 10;

fn query_window(hours: u32) -> Result<Duration> {
    if hours > MAX_QUERY_WINDOW_HOURS {
        return Err(ValidationError::InvalidWindow {
            hours,
            max: MAX_QUERY_WINDOW_HOURS,
        }
        .into());
    }
    Ok(Duration::hours(i64::from(hours)))
}

/// Tunables for the core operations.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Areas forecast every cycle even before they report.
    pub monitored_areas: Vec<i64>,
    /// History fetched per forecast.
    pub history_window: Duration,
    /// Readings an area needs before it is forecast.
    pub min_forecast_readings: usize,
    /// Horizon used by the periodic cycle.
    pub forecast_horizon_hours: u32,
    pub warning_mode: ForecastWarningMode,
    /// Minimum gap between repeats of an alert type per area; `None` disables.
    pub alert_cooldown: Option<Duration>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            monitored_areas: vec![1, 2, 3],
            history_window: Duration::hours(168),
            min_forecast_readings: 10,
            forecast_horizon_hours: 48,
            warning_mode: ForecastWarningMode::EveryPoint,
            alert_cooldown: None,
        }
    }
}

/// External systems the core persists and notifies through.
#[derive(Clone)]
pub struct Collaborators {
    pub readings: Arc<dyn ReadingStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub snapshots: Arc<dyn ModelSnapshotStore>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// A forecast for one area, as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct AreaForecast {
    pub area_id: i64,
    pub method: ForecastMethod,
    pub generated_at: DateTime<Utc>,
    pub points: Vec<ForecastPoint>,
}

/// Outcome of one periodic forecast cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub areas: usize,
    pub evaluated: usize,
    /// Areas with fewer readings than the forecast minimum.
    pub skipped: usize,
    pub failed: usize,
    pub alerts_raised: usize,
}

/// Snapshot of the live system.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub server_time: DateTime<Utc>,
    pub latest_readings: BTreeMap<i64, Reading>,
    pub areas_monitored: Vec<i64>,
    pub total_areas: usize,
    /// Areas whose latest reading is above a gas threshold.
    pub active_alerts: usize,
    pub system_mode: &'static str,
    pub model_trained: bool,
    pub thresholds: Thresholds,
}

enum AreaOutcome {
    Evaluated { alerts: usize },
    Skipped,
}

pub struct Monitor {
    settings: MonitorSettings,
    calibrator: Calibrator,
    thresholds: ThresholdTable,
    latest: LatestReadings,
    forecaster: Arc<Forecaster>,
    dedup: AlertDeduplicator,
    collaborators: Collaborators,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        forecast_config: ForecastConfig,
        collaborators: Collaborators,
    ) -> Self {
        // ---
        Self {
            dedup: AlertDeduplicator::new(settings.alert_cooldown),
            settings,
            calibrator: Calibrator::default(),
            thresholds: ThresholdTable::default(),
            latest: LatestReadings::default(),
            forecaster: Arc::new(Forecaster::new(forecast_config)),
            collaborators,
        }
    }

    /// Start from non-default thresholds.
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = ThresholdTable::new(thresholds);
        self
    }

    /// Start from non-default calibration factors.
    pub fn with_calibration(mut self, factors: CalibrationFactors) -> Self {
        self.calibrator = Calibrator::new(factors);
        self
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn forecaster(&self) -> &Forecaster {
        &self.forecaster
    }

    // --- immediate path

    /// Validate, calibrate and store one raw reading, then evaluate it.
    ///
    /// Store failures are returned to the caller. Alert dispatch is
    /// best-effort and never fails ingestion.
    pub async fn ingest_reading(&self, raw: &Value) -> Result<Reading> {
        // ---
        let reading = self.calibrator.process(raw)?;
        self.accept(&reading).await?;
        Ok(reading)
    }

    /// Ingest a single or multi-zone payload.
    ///
    /// Every zone is validated before any is stored, so a bad zone rejects
    /// the whole payload.
    pub async fn ingest_payload(&self, raw: &Value) -> Result<Vec<Reading>> {
        // ---
        let readings = expand_zones(raw)?
            .iter()
            .map(|zone| self.calibrator.process(zone))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for reading in &readings {
            self.accept(reading).await?;
        }
        if readings.len() > 1 {
            info!("Processed multi-zone payload with {} areas", readings.len());
        }
        Ok(readings)
    }

    async fn accept(&self, reading: &Reading) -> Result<()> {
        // ---
        self.collaborators.readings.store_reading(reading).await?;
        self.latest.record(reading);
        debug!(
            "Accepted reading for area {}: methane {} co {}",
            reading.area_id, reading.methane, reading.co
        );

        let alerts = evaluate_current(reading, &self.thresholds.snapshot());
        self.dispatch(alerts).await;
        Ok(())
    }

    // --- forecasting

    /// Forecast `horizon_hours` ahead for one area from its stored history.
    ///
    /// Fails with [`MonitorError::InsufficientData`] when the area has fewer
    /// readings than the forecast minimum. Horizons above the configured
    /// maximum are clamped.
    pub async fn get_forecast(&self, area_id: i64, horizon_hours: u32) -> Result<AreaForecast> {
        // ---
        if horizon_hours == 0 {
            return Err(ValidationError::InvalidHorizon.into());
        }

        let history = self.history(area_id).await?;
        if history.len() < self.settings.min_forecast_readings {
            return Err(MonitorError::InsufficientData {
                required: self.settings.min_forecast_readings,
                available: history.len(),
            });
        }

        let forecast = self.compute_forecast(history, horizon_hours).await?;
        Ok(AreaForecast {
            area_id,
            method: forecast.method,
            generated_at: Utc::now(),
            points: forecast.points,
        })
    }

    async fn history(&self, area_id: i64) -> Result<Vec<Reading>> {
        Ok(self
            .collaborators
            .readings
            .query_readings(Some(area_id), self.settings.history_window)
            .await?)
    }

    /// Run the forecaster off the async workers and persist any model it
    /// trained along the way.
    async fn compute_forecast(&self, history: Vec<Reading>, horizon_hours: u32) -> Result<Forecast> {
        // ---
        let forecaster = Arc::clone(&self.forecaster);
        let forecast =
            tokio::task::spawn_blocking(move || forecaster.forecast(&history, horizon_hours)).await?;

        if let Some(model) = &forecast.newly_trained {
            if let Err(e) = self.collaborators.snapshots.save(model).await {
                warn!("Failed to save trained model: {}", e);
            }
        }
        Ok(forecast)
    }

    /// Install the saved model, if there is one.
    ///
    /// A missing or unreadable snapshot leaves the forecaster untrained.
    pub async fn restore_model(&self) -> bool {
        // ---
        match self.collaborators.snapshots.load().await {
            Ok(Some(model)) => {
                info!(
                    "Model loaded, trained {} on {} readings",
                    model.trained_at, model.training_readings
                );
                self.forecaster.install(model);
                true
            }
            Ok(None) => {
                info!("No saved model found, will train on demand");
                false
            }
            Err(e) => {
                warn!("Error loading model: {}", e);
                false
            }
        }
    }

    // --- periodic path

    /// Configured areas, stored areas and areas with a live reading.
    pub async fn monitored_areas(&self) -> Result<Vec<i64>> {
        // ---
        let mut areas: BTreeSet<i64> = self.settings.monitored_areas.iter().copied().collect();
        areas.extend(self.collaborators.readings.areas().await?);
        areas.extend(self.latest.areas());
        Ok(areas.into_iter().collect())
    }

    /// Forecast and evaluate every monitored area once.
    ///
    /// A failing area is logged and does not stop the others. The cycle
    /// itself fails when the areas cannot be listed or every area failed.
    pub async fn run_forecast_cycle(&self) -> Result<CycleReport> {
        // ---
        let areas = self.monitored_areas().await?;
        let mut report = CycleReport {
            areas: areas.len(),
            ..CycleReport::default()
        };

        for area_id in areas {
            match self.forecast_area(area_id).await {
                Ok(AreaOutcome::Evaluated { alerts }) => {
                    report.evaluated += 1;
                    report.alerts_raised += alerts;
                }
                Ok(AreaOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!("Forecast for area {} failed: {}", area_id, e);
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 && report.failed == report.areas {
            return Err(MonitorError::CycleFailed(report.failed));
        }

        info!(
            "Forecast cycle complete: {} evaluated, {} skipped, {} failed, {} alerts",
            report.evaluated, report.skipped, report.failed, report.alerts_raised
        );
        Ok(report)
    }

    async fn forecast_area(&self, area_id: i64) -> Result<AreaOutcome> {
        // ---
        let history = self.history(area_id).await?;
        if history.len() < self.settings.min_forecast_readings {
            debug!(
                "Area {} has {} readings, need {} to forecast",
                area_id,
                history.len(),
                self.settings.min_forecast_readings
            );
            return Ok(AreaOutcome::Skipped);
        }

        let forecast = self
            .compute_forecast(history, self.settings.forecast_horizon_hours)
            .await?;

        // One snapshot for the whole evaluation.
        let thresholds = self.thresholds.snapshot();
        let alerts = self
            .settings
            .warning_mode
            .apply(evaluate_forecast(area_id, &forecast.points, &thresholds));
        let raised = self.dispatch(alerts).await;

        debug!(
            "Area {} forecast via {:?}: {} points, {} warnings",
            area_id,
            forecast.method,
            forecast.points.len(),
            raised
        );
        Ok(AreaOutcome::Evaluated { alerts: raised })
    }

    // --- alert emission

    /// Store and deliver every alert the deduplicator admits.
    ///
    /// Returns the number admitted. Store failures are logged.
    async fn dispatch(&self, alerts: Vec<Alert>) -> usize {
        // ---
        let mut admitted = 0;
        for alert in alerts {
            if !self.dedup.admit(&alert) {
                debug!("Suppressed repeat {} alert for area {}", alert.kind, alert.area_id);
                continue;
            }
            admitted += 1;

            let message = alert.message();
            warn!("{}", message);
            if let Err(e) = self.collaborators.alerts.store_alert(&alert).await {
                error!("Failed to store alert: {}", e);
            }
            self.collaborators
                .notifier
                .deliver(&message, alert.severity, alert.area_id)
                .await;
        }
        admitted
    }

    // --- administration and queries

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds.snapshot()
    }

    /// Apply a partial threshold update atomically.
    pub async fn set_thresholds(&self, update: &ThresholdUpdate) -> Result<Thresholds> {
        // ---
        let updated = self.thresholds.update(update)?;
        info!("Thresholds updated: {:?}", updated);
        Ok(updated)
    }

    pub fn calibration(&self) -> CalibrationFactors {
        self.calibrator.factors()
    }

    pub fn set_calibration(&self, metric: Metric, factor: f64) -> Result<CalibrationFactors> {
        self.calibrator.set_factor(metric, factor)?;
        Ok(self.calibrator.factors())
    }

    pub fn latest_reading(&self, area_id: i64) -> Option<Reading> {
        self.latest.get(area_id)
    }

    pub fn latest_readings(&self) -> BTreeMap<i64, Reading> {
        self.latest.snapshot()
    }

    pub async fn recent_readings(&self, area_id: Option<i64>, hours: u32) -> Result<Vec<Reading>> {
        Ok(self
            .collaborators
            .readings
            .query_readings(area_id, query_window(hours)?)
            .await?)
    }

    pub async fn recent_alerts(&self, hours: u32) -> Result<Vec<Alert>> {
        Ok(self
            .collaborators
            .alerts
            .recent_alerts(query_window(hours)?)
            .await?)
    }

    pub fn status(&self) -> MonitorStatus {
        // ---
        let latest = self.latest.snapshot();
        let thresholds = self.thresholds.snapshot();
        let active_alerts = latest
            .values()
            .filter(|r| !evaluate_current(r, &thresholds).is_empty())
            .count();
        let total_areas = latest.len();

        MonitorStatus {
            server_time: Utc::now(),
            areas_monitored: latest.keys().copied().collect(),
            total_areas,
            active_alerts,
            system_mode: if total_areas > 1 {
                "multi-zone"
            } else {
                "single-zone"
            },
            model_trained: self.forecaster.is_trained(),
            latest_readings: latest,
            thresholds,
        }
    }
}
