//! Gas concentration forecasting.
//!
//! A [`Forecaster`] holds at most one [`TrainedModel`] (one regressor per
//! gas plus the feature scaler fitted on the training partition). Forecasts
//! are produced by walk-forward prediction: each predicted hour is appended
//! to the tail window as a synthetic reading and feeds the next hour's
//! features. Errors compound along the horizon and are only reflected in
//! the decaying confidence, not in error bounds.
//!
//! Without a model, or when any prediction step fails, the whole horizon is
//! produced by [`simple_forecast`] instead. A single forecast never mixes
//! the two methods.

pub mod forest;
pub mod regression;
pub mod scaler;

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RegressionError;
use crate::features::{build_features, targets, InsufficientDataError, MIN_READINGS};
use crate::models::{ForecastPoint, Metric, Reading};

use regression::{r2_score, RegressionModel, Regressor, RegressorKind};
use scaler::StandardScaler;

// ---

/// Readings required before a model is fitted.
pub const MIN_TRAINING_READINGS: usize = 20;

/// Readings kept in the walk-forward tail window.
pub const TAIL_WINDOW: usize = 10;

/// Readings used by the trend fallback.
const TREND_WINDOW: usize = 5;

/// Confidence reported for every trend-fallback point.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

const VALIDATION_FRACTION: f64 = 0.2;
const SPLIT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    pub regressor: RegressorKind,
    /// Model-path confidence before any decay.
    pub confidence_start: f64,
    /// Confidence lost per forecast hour.
    pub confidence_decay: f64,
    /// Requested horizons above this are clamped.
    pub max_horizon_hours: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            regressor: RegressorKind::Forest,
            confidence_start: 0.8,
            confidence_decay: 0.01,
            max_horizon_hours: 168,
        }
    }
}

impl ForecastConfig {
    /// Confidence of the model-path point `hour` hours ahead.
    pub fn confidence_at(&self, hour: u32) -> f64 {
        (self.confidence_start - self.confidence_decay * f64::from(hour)).clamp(0.0, 1.0)
    }
}

/// How a forecast was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Model,
    Trend,
}

#[derive(Debug, Clone)]
pub struct Forecast {
    pub method: ForecastMethod,
    pub points: Vec<ForecastPoint>,
    /// Set when this call trained the model; the caller persists it.
    pub newly_trained: Option<Arc<TrainedModel>>,
}

/// Fitted per-gas regressors and the scaler they were trained against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    // ---
    pub methane: RegressionModel,
    pub co: RegressionModel,
    pub scaler: StandardScaler,
    pub trained_at: DateTime<Utc>,
    pub training_readings: usize,
    /// Validation-partition R², when defined.
    pub methane_r2: Option<f64>,
    pub co_r2: Option<f64>,
}

impl TrainedModel {
    /// Fit both gas regressors on `readings`.
    ///
    /// Feature vectors are split 80/20 with a fixed seed; the scaler is fit
    /// on the training partition only.
    pub fn fit(readings: &[Reading], kind: RegressorKind) -> Result<Self, RegressionError> {
        // ---
        let features = build_features(readings).map_err(|_| RegressionError::EmptyTrainingSet)?;
        let rows: Vec<Vec<f64>> = features.iter().map(|f| f.as_slice().to_vec()).collect();
        let methane_y = targets(readings, Metric::Methane);
        let co_y = targets(readings, Metric::Co);

        let (train_idx, valid_idx) = split_indices(rows.len());
        let select_rows = |idx: &[usize]| idx.iter().map(|&i| rows[i].clone()).collect::<Vec<_>>();
        let select = |idx: &[usize], ys: &[f64]| idx.iter().map(|&i| ys[i]).collect::<Vec<_>>();

        let train_rows = select_rows(&train_idx);
        let scaler = StandardScaler::fit(&train_rows)?;
        let train_x = scaler.transform_all(&train_rows)?;
        let valid_x = scaler.transform_all(&select_rows(&valid_idx))?;

        let mut methane = kind.build();
        methane.fit(&train_x, &select(&train_idx, &methane_y))?;
        let mut co = kind.build();
        co.fit(&train_x, &select(&train_idx, &co_y))?;

        let methane_r2 = r2_score(&methane, &valid_x, &select(&valid_idx, &methane_y))?;
        let co_r2 = r2_score(&co, &valid_x, &select(&valid_idx, &co_y))?;

        Ok(Self {
            methane,
            co,
            scaler,
            trained_at: Utc::now(),
            training_readings: readings.len(),
            methane_r2,
            co_r2,
        })
    }

    fn predict(&self, features: &[f64]) -> Result<(f64, f64), RegressionError> {
        let scaled = self.scaler.transform(features)?;
        Ok((self.methane.predict(&scaled)?, self.co.predict(&scaled)?))
    }
}

/// Deterministic shuffled train/validation split of `0..n`.
fn split_indices(n: usize) -> (Vec<usize>, Vec<usize>) {
    // ---
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(SPLIT_SEED));

    let n_valid = ((n as f64 * VALIDATION_FRACTION).ceil() as usize).min(n.saturating_sub(1));
    let valid = indices.split_off(n - n_valid);
    (indices, valid)
}

#[derive(Debug, thiserror::Error)]
enum PredictionFailure {
    #[error(transparent)]
    Features(#[from] InsufficientDataError),

    #[error(transparent)]
    Regression(#[from] RegressionError),
}

/// Trains on demand and produces walk-forward or trend forecasts.
#[derive(Debug, Default)]
pub struct Forecaster {
    config: ForecastConfig,
    model: RwLock<Option<Arc<TrainedModel>>>,
    training: Mutex<()>,
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self {
            config,
            model: RwLock::new(None),
            training: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn model(&self) -> Option<Arc<TrainedModel>> {
        self.model.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_trained(&self) -> bool {
        self.model().is_some()
    }

    /// Install a previously saved model.
    pub fn install(&self, model: TrainedModel) -> Arc<TrainedModel> {
        let model = Arc::new(model);
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = Some(model.clone());
        model
    }

    /// Fit a new model on `readings`.
    ///
    /// Returns `None` and leaves the current state unchanged when there are
    /// fewer than [`MIN_TRAINING_READINGS`] readings or fitting fails.
    pub fn train(&self, readings: &[Reading]) -> Option<Arc<TrainedModel>> {
        // ---
        if readings.len() < MIN_TRAINING_READINGS {
            info!(
                "Insufficient data for training. Need at least {} readings, got {}",
                MIN_TRAINING_READINGS,
                readings.len()
            );
            return None;
        }

        match TrainedModel::fit(readings, self.config.regressor) {
            Ok(model) => {
                info!(
                    "Model training completed on {} readings ({}). Methane R²: {}, CO R²: {}",
                    readings.len(),
                    self.config.regressor,
                    format_r2(model.methane_r2),
                    format_r2(model.co_r2)
                );
                Some(self.install(model))
            }
            Err(e) => {
                warn!("Training failed: {}", e);
                None
            }
        }
    }

    /// Forecast `horizon_hours` hours past the last reading in `history`.
    pub fn forecast(&self, history: &[Reading], horizon_hours: u32) -> Forecast {
        // ---
        let horizon = if horizon_hours > self.config.max_horizon_hours {
            warn!(
                "Requested horizon {}h exceeds maximum {}h, clamping",
                horizon_hours, self.config.max_horizon_hours
            );
            self.config.max_horizon_hours
        } else {
            horizon_hours
        };

        let mut ordered = history.to_vec();
        ordered.sort_by_key(|r| r.timestamp);

        let mut newly_trained = None;
        let model = match self.model() {
            Some(model) => model,
            None => {
                // Serialize on-demand training so concurrent callers fit once.
                let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);
                match self.model() {
                    Some(model) => model,
                    None => match self.train(&ordered) {
                        Some(model) => {
                            newly_trained = Some(model.clone());
                            model
                        }
                        None => {
                            debug!("No trained model, using trend forecast");
                            return Forecast {
                                method: ForecastMethod::Trend,
                                points: simple_forecast(&ordered, horizon),
                                newly_trained: None,
                            };
                        }
                    },
                }
            }
        };

        match self.walk_forward(&model, &ordered, horizon) {
            Ok(points) => Forecast {
                method: ForecastMethod::Model,
                points,
                newly_trained,
            },
            Err(e) => {
                warn!("Prediction failed: {}, using trend forecast", e);
                Forecast {
                    method: ForecastMethod::Trend,
                    points: simple_forecast(&ordered, horizon),
                    newly_trained,
                }
            }
        }
    }

    fn walk_forward(
        &self,
        model: &TrainedModel,
        history: &[Reading],
        horizon: u32,
    ) -> Result<Vec<ForecastPoint>, PredictionFailure> {
        // ---
        let last = history.last().ok_or(InsufficientDataError {
            required: MIN_READINGS,
            available: 0,
        })?;
        let mut tail: Vec<Reading> = history[history.len().saturating_sub(TAIL_WINDOW)..].to_vec();
        let mut points = Vec::with_capacity(horizon as usize);

        for hour in 1..=horizon {
            let features = build_features(&tail)?;
            let latest = features.last().ok_or(InsufficientDataError {
                required: MIN_READINGS,
                available: tail.len(),
            })?;

            let (methane, co) = model.predict(latest.as_slice())?;
            let methane = methane.max(0.0);
            let co = co.max(0.0);
            let timestamp = last.timestamp + Duration::hours(i64::from(hour));

            points.push(ForecastPoint {
                timestamp,
                methane: round2(methane),
                co: round2(co),
                confidence: self.config.confidence_at(hour),
            });

            // Environmental channels are held at their last observed values.
            tail.push(Reading {
                methane,
                co,
                timestamp,
                ..last.clone()
            });
            if tail.len() > TAIL_WINDOW {
                tail.remove(0);
            }
        }

        Ok(points)
    }
}

/// Linear-trend extrapolation from the last few readings.
///
/// The per-step trend is `(last - first) / count` over the last five
/// readings. Needs at least two readings; returns an empty forecast
/// otherwise. Values are clamped at zero and every point carries
/// [`FALLBACK_CONFIDENCE`].
pub fn simple_forecast(history: &[Reading], horizon_hours: u32) -> Vec<ForecastPoint> {
    // ---
    if history.len() < 2 {
        return Vec::new();
    }

    let recent = &history[history.len().saturating_sub(TREND_WINDOW)..];
    let count = recent.len() as f64;
    let (first, last) = (&recent[0], &recent[recent.len() - 1]);
    let methane_trend = (last.methane - first.methane) / count;
    let co_trend = (last.co - first.co) / count;

    (1..=horizon_hours)
        .map(|hour| {
            let h = f64::from(hour);
            ForecastPoint {
                timestamp: last.timestamp + Duration::hours(i64::from(hour)),
                methane: round2((last.methane + methane_trend * h).max(0.0)),
                co: round2((last.co + co_trend * h).max(0.0)),
                confidence: FALLBACK_CONFIDENCE,
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn format_r2(score: Option<f64>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{:.3}", s))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn create_test_history(n: usize) -> Vec<Reading> {
        // ---
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let t = i as f64;
                Reading {
                    area_id: 1,
                    methane: 400.0 + 12.0 * t + 15.0 * (t / 3.0).sin(),
                    co: 10.0 + 0.4 * t + (t / 2.0).cos(),
                    temperature: 22.0 + 3.0 * (t / 6.0).sin(),
                    humidity: 55.0 + 5.0 * (t / 5.0).cos(),
                    water_level: 30.0 + 0.1 * t,
                    timestamp: start + Duration::hours(i as i64),
                }
            })
            .collect()
    }

    fn linear_config() -> ForecastConfig {
        ForecastConfig {
            regressor: RegressorKind::Linear,
            ..ForecastConfig::default()
        }
    }

    fn assert_hourly(points: &[ForecastPoint], origin: DateTime<Utc>) {
        // ---
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point.timestamp, origin + Duration::hours(i as i64 + 1));
        }
    }

    #[test]
    fn test_simple_forecast_needs_two_readings() {
        // ---
        assert!(simple_forecast(&[], 5).is_empty());
        assert!(simple_forecast(&create_test_history(1), 5).is_empty());
        assert_eq!(simple_forecast(&create_test_history(2), 5).len(), 5);
    }

    #[test]
    fn test_simple_forecast_extrapolates_last_five() {
        // ---
        let mut history = create_test_history(8);
        for (i, r) in history.iter_mut().enumerate() {
            r.methane = 10.0 * i as f64;
            r.co = 20.0;
        }

        let points = simple_forecast(&history, 3);
        // last five: 30..70, trend (70 - 30) / 5 = 8
        assert_eq!(points[0].methane, 78.0);
        assert_eq!(points[2].methane, 94.0);
        assert_eq!(points[0].co, 20.0);
        assert!(points.iter().all(|p| p.confidence == FALLBACK_CONFIDENCE));
        assert_hourly(&points, history[7].timestamp);
    }

    #[test]
    fn test_simple_forecast_is_deterministic_and_non_negative() {
        // ---
        let mut history = create_test_history(6);
        for (i, r) in history.iter_mut().enumerate() {
            r.methane = 50.0 - 10.0 * i as f64;
            r.co = 5.0 - i as f64;
        }

        let a = simple_forecast(&history, 24);
        let b = simple_forecast(&history, 24);
        assert_eq!(a, b);

        for pair in a.windows(2) {
            assert!(pair[1].methane <= pair[0].methane);
        }
        assert!(a.iter().all(|p| p.methane >= 0.0 && p.co >= 0.0));
        assert_eq!(a[23].methane, 0.0);
    }

    #[test]
    fn test_train_requires_twenty_readings() {
        // ---
        let forecaster = Forecaster::new(linear_config());
        assert!(forecaster.train(&create_test_history(19)).is_none());
        assert!(!forecaster.is_trained());

        assert!(forecaster.train(&create_test_history(20)).is_some());
        assert!(forecaster.is_trained());
    }

    #[test]
    fn test_untrained_with_little_data_uses_trend() {
        // ---
        let forecaster = Forecaster::default();
        let history = create_test_history(15);

        let forecast = forecaster.forecast(&history, 48);

        assert_eq!(forecast.method, ForecastMethod::Trend);
        assert_eq!(forecast.points, simple_forecast(&history, 48));
        assert!(forecast.newly_trained.is_none());
        assert!(!forecaster.is_trained());
    }

    #[test]
    fn test_forecast_trains_on_demand() {
        // ---
        let forecaster = Forecaster::default();
        let history = create_test_history(30);

        let forecast = forecaster.forecast(&history, 6);

        assert_eq!(forecast.method, ForecastMethod::Model);
        let trained = forecast.newly_trained.expect("model should be trained");
        assert_eq!(trained.training_readings, 30);
        assert!(forecaster.is_trained());

        // Second call reuses the model without retraining.
        assert!(forecaster.forecast(&history, 6).newly_trained.is_none());
    }

    #[test]
    fn test_concurrent_forecasts_train_once() {
        // ---
        let forecaster = Forecaster::new(ForecastConfig {
            regressor: RegressorKind::Linear,
            ..ForecastConfig::default()
        });
        let history = create_test_history(30);

        let forecasts: Vec<Forecast> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| forecaster.forecast(&history, 5)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let trained = forecasts.iter().filter(|f| f.newly_trained.is_some()).count();
        assert_eq!(trained, 1);
        assert!(forecasts.iter().all(|f| f.points.len() == 5));
        assert!(forecaster.is_trained());
    }

    #[test]
    fn test_walk_forward_shape() {
        // ---
        for kind in [RegressorKind::Forest, RegressorKind::Linear] {
            let forecaster = Forecaster::new(ForecastConfig {
                regressor: kind,
                ..ForecastConfig::default()
            });
            let history = create_test_history(40);
            forecaster.train(&history).unwrap();

            let forecast = forecaster.forecast(&history, 24);

            assert_eq!(forecast.method, ForecastMethod::Model);
            assert_eq!(forecast.points.len(), 24);
            assert_hourly(&forecast.points, history[39].timestamp);
            for (i, point) in forecast.points.iter().enumerate() {
                let expected = 0.8 - 0.01 * (i as f64 + 1.0);
                assert!((point.confidence - expected).abs() < 1e-9);
                assert!(point.methane >= 0.0 && point.co >= 0.0);
            }
            for pair in forecast.points.windows(2) {
                assert!(pair[1].confidence <= pair[0].confidence);
            }
        }
    }

    #[test]
    fn test_confidence_never_negative() {
        // ---
        let config = ForecastConfig::default();
        assert_eq!(config.confidence_at(80), 0.0);
        assert_eq!(config.confidence_at(200), 0.0);
    }

    #[test]
    fn test_short_tail_falls_back_for_whole_horizon() {
        // ---
        let forecaster = Forecaster::new(linear_config());
        forecaster.train(&create_test_history(30)).unwrap();

        let short = create_test_history(3);
        let forecast = forecaster.forecast(&short, 10);

        assert_eq!(forecast.method, ForecastMethod::Trend);
        assert_eq!(forecast.points, simple_forecast(&short, 10));
    }

    #[test]
    fn test_horizon_is_clamped() {
        // ---
        let forecaster = Forecaster::new(ForecastConfig {
            max_horizon_hours: 12,
            ..ForecastConfig::default()
        });
        let forecast = forecaster.forecast(&create_test_history(10), 100);
        assert_eq!(forecast.points.len(), 12);
    }

    #[test]
    fn test_installed_model_is_used() {
        // ---
        let history = create_test_history(25);
        let model = TrainedModel::fit(&history, RegressorKind::Linear).unwrap();
        let forecaster = Forecaster::default();
        forecaster.install(model.clone());

        assert_eq!(forecaster.model().as_deref(), Some(&model));
        assert_eq!(forecaster.forecast(&history, 3).method, ForecastMethod::Model);
    }

    #[test]
    fn test_split_is_deterministic() {
        // ---
        let (train_a, valid_a) = split_indices(16);
        let (train_b, valid_b) = split_indices(16);
        assert_eq!(train_a, train_b);
        assert_eq!(valid_a, valid_b);
        assert_eq!(train_a.len(), 12);
        assert_eq!(valid_a.len(), 4);
    }
}
