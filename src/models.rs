//! Domain data models for the LEMOS monitoring core.
//!
//! Readings, thresholds, forecast points and alerts are plain serde types
//! shared by the calibrator, forecaster, alert engine and the HTTP layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ---

/// A sensor channel reported by field devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Methane,
    Co,
    Temperature,
    Humidity,
    WaterLevel,
}

impl Metric {
    /// Every channel, in payload declaration order.
    pub const ALL: [Metric; 5] = [
        Metric::Methane,
        Metric::Co,
        Metric::Temperature,
        Metric::Humidity,
        Metric::WaterLevel,
    ];

    /// Gas channels that are forecast and alerted on, in evaluation order.
    pub const GASES: [Metric; 2] = [Metric::Methane, Metric::Co];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Methane => "methane",
            Metric::Co => "co",
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::WaterLevel => "water_level",
        }
    }

    /// Physical range a calibrated value is clamped into.
    ///
    /// Methane and CO are ppm, temperature is °C, humidity and water level
    /// are percentages.
    pub fn valid_range(self) -> (f64, f64) {
        match self {
            Metric::Methane => (0.0, 10_000.0),
            Metric::Co => (0.0, 1_000.0),
            Metric::Temperature => (-40.0, 85.0),
            Metric::Humidity => (0.0, 100.0),
            Metric::WaterLevel => (0.0, 100.0),
        }
    }

    /// Clamp `value` to [`Metric::valid_range`]. In-range values pass through unchanged.
    pub fn clamp(self, value: f64) -> f64 {
        let (min, max) = self.valid_range();
        value.clamp(min, max)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| ValidationError::UnknownMetric(s.to_string()))
    }
}

/// A calibrated, range-clamped reading for one area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    // ---
    pub area_id: i64,
    pub methane: f64,
    pub co: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub water_level: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Methane => self.methane,
            Metric::Co => self.co,
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::WaterLevel => self.water_level,
        }
    }
}

/// Process-wide alert limits, keyed by metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    // ---
    /// ppm
    pub methane: f64,
    /// ppm
    pub co: f64,
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            methane: 1000.0,
            co: 50.0,
            temperature: 35.0,
            humidity: 80.0,
        }
    }
}

impl Thresholds {
    /// Limit for `metric`, or `None` for channels without a threshold.
    pub fn limit(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Methane => Some(self.methane),
            Metric::Co => Some(self.co),
            Metric::Temperature => Some(self.temperature),
            Metric::Humidity => Some(self.humidity),
            Metric::WaterLevel => None,
        }
    }
}

/// Partial threshold map accepted by the administrative update.
///
/// Unknown keys are rejected at deserialization time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methane: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl ThresholdUpdate {
    fn entries(&self) -> [(Metric, Option<f64>); 4] {
        [
            (Metric::Methane, self.methane),
            (Metric::Co, self.co),
            (Metric::Temperature, self.temperature),
            (Metric::Humidity, self.humidity),
        ]
    }

    /// Every provided limit must be finite and positive.
    pub fn validate(&self) -> Result<(), ValidationError> {
        // ---
        for (metric, limit) in self.entries() {
            if let Some(value) = limit {
                if !value.is_finite() || value <= 0.0 {
                    return Err(ValidationError::InvalidThreshold { metric, value });
                }
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, thresholds: &mut Thresholds) {
        // ---
        if let Some(v) = self.methane {
            thresholds.methane = v;
        }
        if let Some(v) = self.co {
            thresholds.co = v;
        }
        if let Some(v) = self.temperature {
            thresholds.temperature = v;
        }
        if let Some(v) = self.humidity {
            thresholds.humidity = v;
        }
    }
}

/// One hour of predicted gas concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    // ---
    pub timestamp: DateTime<Utc>,
    pub methane: f64,
    pub co: f64,
    /// In `[0, 1]`; decays with horizon on the model path.
    pub confidence: f64,
}

impl ForecastPoint {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Methane => Some(self.methane),
            Metric::Co => Some(self.co),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => f.write_str("medium"),
            Severity::High => f.write_str("high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Methane,
    Co,
    ForecastWarning,
}

impl AlertKind {
    pub fn name(self) -> &'static str {
        match self {
            AlertKind::Methane => "methane",
            AlertKind::Co => "co",
            AlertKind::ForecastWarning => "forecast_warning",
        }
    }

    /// Current-value alert kind for a gas metric.
    pub fn for_metric(metric: Metric) -> Option<Self> {
        match metric {
            Metric::Methane => Some(AlertKind::Methane),
            Metric::Co => Some(AlertKind::Co),
            _ => None,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedValues {
    pub methane: f64,
    pub co: f64,
}

/// An emitted alert. Immutable once created.
///
/// Current-value alerts carry `value` and `threshold`; forecast warnings
/// carry `predicted_time` and `predicted_values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    // ---
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub area_id: i64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_values: Option<PredictedValues>,
}

impl Alert {
    pub fn current(
        kind: AlertKind,
        area_id: i64,
        value: f64,
        threshold: f64,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            area_id,
            severity,
            timestamp,
            value: Some(value),
            threshold: Some(threshold),
            predicted_time: None,
            predicted_values: None,
        }
    }

    /// Forecast warnings are always `medium`.
    pub fn forecast_warning(area_id: i64, point: &ForecastPoint, issued_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: AlertKind::ForecastWarning,
            area_id,
            severity: Severity::Medium,
            timestamp: issued_at,
            value: None,
            threshold: None,
            predicted_time: Some(point.timestamp),
            predicted_values: Some(PredictedValues {
                methane: point.methane,
                co: point.co,
            }),
        }
    }

    /// Human-readable notification text.
    pub fn message(&self) -> String {
        // ---
        match (self.kind, self.value, self.threshold, self.predicted_time) {
            (AlertKind::ForecastWarning, _, _, Some(at)) => format!(
                "LEMOS FORECAST WARNING: Dangerous levels predicted for Area {} at {}",
                self.area_id,
                at.to_rfc3339()
            ),
            (kind, Some(value), Some(threshold), _) => format!(
                "LEMOS ALERT: {} level {} exceeds threshold {} in Area {}",
                kind.name().to_uppercase(),
                value,
                threshold,
                self.area_id
            ),
            (kind, _, _, _) => format!("LEMOS ALERT: {} in Area {}", kind.name().to_uppercase(), self.area_id),
        }
    }
}
