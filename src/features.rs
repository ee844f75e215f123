//! Time-series feature construction.
//!
//! Each feature vector describes the reading at index `i` using the
//! [`WINDOW`] readings before it:
//!
//! | idx | feature                         |
//! |-----|---------------------------------|
//! | 0   | hour of day of reading `i`      |
//! | 1   | day of week (Monday = 0)        |
//! | 2-4 | methane mean / std / trend      |
//! | 5-7 | CO mean / std / trend           |
//! | 8   | window mean temperature         |
//! | 9   | window mean humidity            |
//! | 10  | temperature of reading `i`      |
//! | 11  | humidity of reading `i`         |
//! | 12  | water level of reading `i`      |

use chrono::{Datelike, Timelike};

use crate::models::{Metric, Reading};

// ---

/// Number of preceding readings summarized per vector.
pub const WINDOW: usize = 4;

/// Minimum readings needed to produce one vector.
pub const MIN_READINGS: usize = WINDOW + 1;

pub const FEATURE_COUNT: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Returned when fewer than [`MIN_READINGS`] readings are supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("need at least {required} readings to build features, got {available}")]
pub struct InsufficientDataError {
    pub required: usize,
    pub available: usize,
}

/// Build one feature vector per reading from index [`WINDOW`] onwards.
///
/// Output length is `readings.len() - WINDOW`. Readings are ordered by
/// timestamp first; the input slice is left untouched.
pub fn build_features(readings: &[Reading]) -> Result<Vec<FeatureVector>, InsufficientDataError> {
    // ---
    if readings.len() < MIN_READINGS {
        return Err(InsufficientDataError {
            required: MIN_READINGS,
            available: readings.len(),
        });
    }

    let mut ordered: Vec<&Reading> = readings.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let vectors = (WINDOW..ordered.len())
        .map(|i| feature_row(&ordered[i - WINDOW..i], ordered[i]))
        .collect();

    Ok(vectors)
}

/// Gas targets aligned with [`build_features`] output.
pub fn targets(readings: &[Reading], metric: Metric) -> Vec<f64> {
    // ---
    let mut ordered: Vec<&Reading> = readings.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);
    ordered.iter().skip(WINDOW).map(|r| r.value(metric)).collect()
}

fn feature_row(window: &[&Reading], current: &Reading) -> FeatureVector {
    // ---
    let methane: Vec<f64> = window.iter().map(|r| r.methane).collect();
    let co: Vec<f64> = window.iter().map(|r| r.co).collect();
    let temperature: Vec<f64> = window.iter().map(|r| r.temperature).collect();
    let humidity: Vec<f64> = window.iter().map(|r| r.humidity).collect();

    FeatureVector([
        f64::from(current.timestamp.hour()),
        f64::from(current.timestamp.weekday().num_days_from_monday()),
        mean(&methane),
        std_dev(&methane),
        trend(&methane),
        mean(&co),
        std_dev(&co),
        trend(&co),
        mean(&temperature),
        mean(&humidity),
        current.temperature,
        current.humidity,
        current.water_level,
    ])
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

fn trend(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => last - first,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn create_test_readings(n: usize) -> Vec<Reading> {
        // ---
        // 2025-03-24 is a Monday.
        let start = Utc.with_ymd_and_hms(2025, 3, 24, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Reading {
                area_id: 1,
                methane: 100.0 + 10.0 * i as f64,
                co: 5.0 + i as f64,
                temperature: 20.0 + i as f64,
                humidity: 50.0,
                water_level: 10.0 + i as f64,
                timestamp: start + Duration::hours(i as i64),
            })
            .collect()
    }

    #[test]
    fn test_output_length_is_n_minus_window() {
        // ---
        for n in [5, 6, 10, 30] {
            let readings = create_test_readings(n);
            assert_eq!(build_features(&readings).unwrap().len(), n - 4);
        }
    }

    #[test]
    fn test_too_few_readings_fails() {
        // ---
        let readings = create_test_readings(4);
        let err = build_features(&readings).unwrap_err();
        assert_eq!(err.required, 5);
        assert_eq!(err.available, 4);
        assert!(build_features(&[]).is_err());
    }

    #[test]
    fn test_feature_values() {
        // ---
        let readings = create_test_readings(5);
        let features = build_features(&readings).unwrap();
        let f = features[0].as_slice();

        assert_eq!(f.len(), FEATURE_COUNT);
        assert_eq!(f[0], 4.0); // 04:00
        assert_eq!(f[1], 0.0); // Monday
        assert_eq!(f[2], 115.0); // mean(100, 110, 120, 130)
        assert!((f[3] - 125.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(f[4], 30.0);
        assert_eq!(f[5], 6.5);
        assert_eq!(f[7], 3.0);
        assert_eq!(f[8], 21.5);
        assert_eq!(f[9], 50.0);
        assert_eq!(f[10], 24.0);
        assert_eq!(f[11], 50.0);
        assert_eq!(f[12], 14.0);
    }

    #[test]
    fn test_unsorted_input_is_ordered_without_mutation() {
        // ---
        let sorted = create_test_readings(8);
        let mut shuffled = sorted.clone();
        shuffled.reverse();
        let before = shuffled.clone();

        assert_eq!(build_features(&shuffled).unwrap(), build_features(&sorted).unwrap());
        assert_eq!(shuffled, before);
    }

    #[test]
    fn test_targets_align_with_features() {
        // ---
        let readings = create_test_readings(7);
        let methane = targets(&readings, Metric::Methane);
        assert_eq!(methane, vec![140.0, 150.0, 160.0]);
        assert_eq!(methane.len(), build_features(&readings).unwrap().len());
    }
}
