//! Threshold-driven alert evaluation.
//!
//! [`evaluate_current`] and [`evaluate_forecast`] are pure: they only turn
//! values and a threshold snapshot into [`Alert`] records. Deduplication is
//! a dispatch concern handled by [`AlertDeduplicator`] and
//! [`ForecastWarningMode`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::models::{Alert, AlertKind, ForecastPoint, Metric, Reading, Severity, Thresholds};

// ---

/// Values above `limit * HIGH_SEVERITY_RATIO` are `high`.
pub const HIGH_SEVERITY_RATIO: f64 = 1.5;

/// One alert per gas above its threshold, methane before CO.
pub fn evaluate_current(reading: &Reading, thresholds: &Thresholds) -> Vec<Alert> {
    // ---
    Metric::GASES
        .into_iter()
        .filter_map(|metric| {
            let limit = thresholds.limit(metric)?;
            let kind = AlertKind::for_metric(metric)?;
            let value = reading.value(metric);
            if value <= limit {
                return None;
            }

            let severity = if value > limit * HIGH_SEVERITY_RATIO {
                Severity::High
            } else {
                Severity::Medium
            };
            Some(Alert::current(
                kind,
                reading.area_id,
                value,
                limit,
                severity,
                reading.timestamp,
            ))
        })
        .collect()
}

/// One `forecast_warning` per point where any gas exceeds its threshold.
///
/// Points are scanned chronologically. A point breaching both gases still
/// yields a single warning carrying both predicted values.
pub fn evaluate_forecast(area_id: i64, points: &[ForecastPoint], thresholds: &Thresholds) -> Vec<Alert> {
    evaluate_forecast_at(area_id, points, thresholds, Utc::now())
}

pub fn evaluate_forecast_at(
    area_id: i64,
    points: &[ForecastPoint],
    thresholds: &Thresholds,
    issued_at: DateTime<Utc>,
) -> Vec<Alert> {
    // ---
    let mut ordered: Vec<&ForecastPoint> = points.iter().collect();
    ordered.sort_by_key(|p| p.timestamp);

    ordered
        .into_iter()
        .filter(|point| {
            Metric::GASES.into_iter().any(|metric| {
                matches!(
                    (point.value(metric), thresholds.limit(metric)),
                    (Some(value), Some(limit)) if value > limit
                )
            })
        })
        .map(|point| Alert::forecast_warning(area_id, point, issued_at))
        .collect()
}

/// How many forecast warnings one forecast run may emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForecastWarningMode {
    /// One warning per breaching point.
    #[default]
    EveryPoint,
    /// Only the earliest breaching point.
    FirstPoint,
}

impl ForecastWarningMode {
    pub fn apply(self, mut alerts: Vec<Alert>) -> Vec<Alert> {
        if self == ForecastWarningMode::FirstPoint {
            alerts.truncate(1);
        }
        alerts
    }
}

impl FromStr for ForecastWarningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every_point" | "all" => Ok(ForecastWarningMode::EveryPoint),
            "first_point" | "first" => Ok(ForecastWarningMode::FirstPoint),
            other => Err(format!("unknown forecast warning mode '{}'", other)),
        }
    }
}

/// Suppresses repeats of the same alert type for an area within a cooldown.
///
/// With no cooldown every alert is admitted.
#[derive(Debug, Default)]
pub struct AlertDeduplicator {
    cooldown: Option<Duration>,
    last_sent: Mutex<HashMap<(i64, AlertKind), DateTime<Utc>>>,
}

impl AlertDeduplicator {
    pub fn new(cooldown: Option<Duration>) -> Self {
        Self {
            cooldown: cooldown.filter(|c| *c > Duration::zero()),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    /// Record `alert` and report whether it should be dispatched.
    pub fn admit(&self, alert: &Alert) -> bool {
        // ---
        let Some(cooldown) = self.cooldown else {
            return true;
        };

        let key = (alert.area_id, alert.kind);
        let mut last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&previous) = last_sent.get(&key) {
            let elapsed = if alert.timestamp >= previous {
                alert.timestamp - previous
            } else {
                previous - alert.timestamp
            };
            if elapsed < cooldown {
                return false;
            }
        }
        last_sent.insert(key, alert.timestamp);
        true
    }
}
