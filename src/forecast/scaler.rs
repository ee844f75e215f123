//! Z-score feature scaling.
//!
//! Fitted once on the training partition; the same parameters are applied
//! at prediction time.

use serde::{Deserialize, Serialize};

use crate::error::RegressionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit column means and population standard deviations.
    ///
    /// Constant columns get a scale of 1 so they transform to zero.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, RegressionError> {
        // ---
        let first = rows.first().ok_or(RegressionError::EmptyTrainingSet)?;
        let dim = first.len();
        let n = rows.len() as f64;

        let mut means = vec![0.0; dim];
        for row in rows {
            if row.len() != dim {
                return Err(RegressionError::DimensionMismatch {
                    expected: dim,
                    got: row.len(),
                });
            }
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }

        let mut scales = vec![0.0; dim];
        for row in rows {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = s.sqrt();
            if !s.is_finite() {
                return Err(RegressionError::NonFinite);
            }
            if *s == 0.0 {
                *s = 1.0;
            }
        }

        Ok(Self { means, scales })
    }

    pub fn dimension(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, RegressionError> {
        // ---
        if row.len() != self.dimension() {
            return Err(RegressionError::DimensionMismatch {
                expected: self.dimension(),
                got: row.len(),
            });
        }

        Ok(row
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    pub fn transform_all(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, RegressionError> {
        rows.iter().map(|row| self.transform(row)).collect()
    }
}
