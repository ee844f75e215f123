//! Calibration and validation of raw device payloads.
//!
//! A raw payload is a JSON object carrying `area_id`, the five sensor
//! channels and an optional `timestamp`. Each channel is multiplied by its
//! calibration factor, rounded to two decimals and clamped into the
//! channel's physical range. Range violations never drop a reading; only
//! missing or non-numeric required fields do.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::ValidationError;
use crate::models::{Metric, Reading};

// ---

/// Per-channel multiplicative calibration factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFactors {
    pub methane: f64,
    pub co: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub water_level: f64,
}

impl Default for CalibrationFactors {
    fn default() -> Self {
        Self {
            methane: 1.0,
            co: 1.0,
            temperature: 1.0,
            humidity: 1.0,
            water_level: 1.0,
        }
    }
}

impl CalibrationFactors {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Methane => self.methane,
            Metric::Co => self.co,
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::WaterLevel => self.water_level,
        }
    }

    fn slot(&mut self, metric: Metric) -> &mut f64 {
        match metric {
            Metric::Methane => &mut self.methane,
            Metric::Co => &mut self.co,
            Metric::Temperature => &mut self.temperature,
            Metric::Humidity => &mut self.humidity,
            Metric::WaterLevel => &mut self.water_level,
        }
    }
}

/// Normalizes raw payloads into [`Reading`]s.
#[derive(Debug, Default)]
pub struct Calibrator {
    factors: RwLock<CalibrationFactors>,
}

impl Calibrator {
    pub fn new(factors: CalibrationFactors) -> Self {
        Self {
            factors: RwLock::new(factors),
        }
    }

    pub fn factors(&self) -> CalibrationFactors {
        *self.factors.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the calibration factor for one channel.
    ///
    /// Takes effect for every reading processed after this returns.
    pub fn set_factor(&self, metric: Metric, factor: f64) -> Result<(), ValidationError> {
        // ---
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ValidationError::InvalidCalibration {
                metric,
                value: factor,
            });
        }

        let mut factors = self.factors.write().unwrap_or_else(PoisonError::into_inner);
        *factors.slot(metric) = factor;
        info!("Updated {} calibration factor to {}", metric, factor);
        Ok(())
    }

    /// Validate and calibrate a raw payload, stamping it with the current
    /// time if it carries no timestamp.
    pub fn process(&self, raw: &Value) -> Result<Reading, ValidationError> {
        self.process_at(raw, Utc::now())
    }

    /// Same as [`Calibrator::process`] with an explicit default timestamp.
    pub fn process_at(&self, raw: &Value, now: DateTime<Utc>) -> Result<Reading, ValidationError> {
        // ---
        let obj = raw
            .as_object()
            .ok_or_else(|| ValidationError::InvalidPayload("expected a JSON object".into()))?;

        let area_id = area_id_field(obj, "area_id")?;
        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => now,
            Some(Value::String(s)) => parse_timestamp(s)?,
            Some(other) => return Err(ValidationError::InvalidTimestamp(other.to_string())),
        };

        // Snapshot the factors once so a concurrent update cannot split a reading.
        let factors = self.factors();
        let mut values = [0.0; 5];
        for (slot, metric) in values.iter_mut().zip(Metric::ALL) {
            let raw_value = numeric_field(obj, metric.name())?;
            *slot = calibrate(metric, raw_value, factors.get(metric));
        }
        let [methane, co, temperature, humidity, water_level] = values;

        Ok(Reading {
            area_id,
            methane,
            co,
            temperature,
            humidity,
            water_level,
            timestamp,
        })
    }
}

fn calibrate(metric: Metric, raw: f64, factor: f64) -> f64 {
    // ---
    let calibrated = round2(raw * factor);
    let clamped = metric.clamp(calibrated);
    if clamped != calibrated {
        let (min, max) = metric.valid_range();
        warn!(
            "{} value {} outside normal range ({}-{}), clamped to {}",
            metric, calibrated, min, max, clamped
        );
    }
    clamped
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn numeric_field(obj: &Map<String, Value>, field: &str) -> Result<f64, ValidationError> {
    // ---
    let value = obj
        .get(field)
        .ok_or_else(|| ValidationError::MissingField(field.to_string()))?;

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(ValidationError::NotNumeric {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

fn area_id_field(obj: &Map<String, Value>, field: &str) -> Result<i64, ValidationError> {
    // ---
    let value = obj
        .get(field)
        .ok_or_else(|| ValidationError::MissingField(field.to_string()))?;

    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| ValidationError::NotNumeric {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ValidationError> {
    // ---
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| ValidationError::InvalidTimestamp(s.to_string()))
}

/// Split a multi-zone payload into one raw payload per zone.
///
/// A multi-zone payload carries per-zone objects under `area_<n>` keys;
/// every other top-level field is shared and copied into each zone unless
/// the zone sets it itself. `area_id` defaults to `<n>`. Payloads without
/// zone keys are returned unchanged as a single element.
pub fn expand_zones(raw: &Value) -> Result<Vec<Value>, ValidationError> {
    // ---
    let obj = raw
        .as_object()
        .ok_or_else(|| ValidationError::InvalidPayload("expected a JSON object".into()))?;

    let mut zones: BTreeMap<i64, &Map<String, Value>> = BTreeMap::new();
    let mut shared = Map::new();
    for (key, value) in obj {
        match zone_number(key) {
            Some(n) => {
                let zone = value.as_object().ok_or_else(|| {
                    ValidationError::InvalidPayload(format!("zone '{}' is not an object", key))
                })?;
                zones.insert(n, zone);
            }
            None => {
                shared.insert(key.clone(), value.clone());
            }
        }
    }

    if zones.is_empty() {
        return Ok(vec![raw.clone()]);
    }

    Ok(zones
        .into_iter()
        .map(|(n, zone)| {
            let mut merged = shared.clone();
            merged.insert("area_id".to_string(), Value::from(n));
            for (key, value) in zone {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        })
        .collect())
}

fn zone_number(key: &str) -> Option<i64> {
    key.strip_prefix("area_")?.parse().ok()
}
