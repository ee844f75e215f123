//! Regression capability used by the forecaster.
//!
//! The forecaster only needs `fit(features, targets)` and
//! `predict(features)`; [`Regressor`] captures that contract so the
//! algorithm can be swapped through configuration. [`RegressionModel`] is
//! the serializable set of implementations that model snapshots can hold.

use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::forest::{ForestParams, RandomForestRegressor};
use crate::error::RegressionError;

// ---

pub trait Regressor {
    /// Fit against row-major `features` and one target per row.
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), RegressionError>;

    /// Predict a single row.
    fn predict(&self, features: &[f64]) -> Result<f64, RegressionError>;
}

/// Check that a training set is non-empty and rectangular; returns the row width.
pub(crate) fn check_training_set(
    features: &[Vec<f64>],
    targets: &[f64],
) -> Result<usize, RegressionError> {
    // ---
    if features.len() != targets.len() {
        return Err(RegressionError::LengthMismatch {
            features: features.len(),
            targets: targets.len(),
        });
    }
    let dim = features
        .first()
        .map(Vec::len)
        .ok_or(RegressionError::EmptyTrainingSet)?;
    if let Some(bad) = features.iter().find(|row| row.len() != dim) {
        return Err(RegressionError::DimensionMismatch {
            expected: dim,
            got: bad.len(),
        });
    }
    if features.iter().flatten().chain(targets).any(|v| !v.is_finite()) {
        return Err(RegressionError::NonFinite);
    }
    Ok(dim)
}

/// Coefficient of determination of `model` on a held-out set.
///
/// `None` when the set is empty or its targets have no variance.
pub fn r2_score<R: Regressor + ?Sized>(
    model: &R,
    features: &[Vec<f64>],
    targets: &[f64],
) -> Result<Option<f64>, RegressionError> {
    // ---
    if targets.is_empty() {
        return Ok(None);
    }
    let mean = targets.iter().sum::<f64>() / targets.len() as f64;
    let ss_tot: f64 = targets.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return Ok(None);
    }

    let mut ss_res = 0.0;
    for (row, y) in features.iter().zip(targets) {
        ss_res += (y - model.predict(row)?).powi(2);
    }
    Ok(Some(1.0 - ss_res / ss_tot))
}

/// Ridge regression solved through the normal equations.
///
/// The intercept is not penalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    lambda: f64,
    intercept: f64,
    weights: Vec<f64>,
}

impl Default for LinearRegressor {
    fn default() -> Self {
        Self::new(1e-3)
    }
}

impl LinearRegressor {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            intercept: 0.0,
            weights: Vec::new(),
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Regressor for LinearRegressor {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), RegressionError> {
        // ---
        let dim = check_training_set(features, targets)?;
        let size = dim + 1;

        // Column 0 is the bias term.
        let design = DMatrix::from_fn(features.len(), size, |r, c| {
            if c == 0 {
                1.0
            } else {
                features[r][c - 1]
            }
        });
        let observed = DVector::from_column_slice(targets);

        let mut gram = design.transpose() * &design;
        for i in 1..size {
            gram[(i, i)] += self.lambda;
        }
        let moment = design.transpose() * observed;

        let solution = solve(gram, moment)?;
        self.intercept = solution[0];
        self.weights = solution.iter().skip(1).copied().collect();
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> Result<f64, RegressionError> {
        // ---
        if self.weights.is_empty() {
            return Err(RegressionError::NotFitted);
        }
        if features.len() != self.weights.len() {
            return Err(RegressionError::DimensionMismatch {
                expected: self.weights.len(),
                got: features.len(),
            });
        }

        let y = self.intercept
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>();
        if y.is_finite() {
            Ok(y)
        } else {
            Err(RegressionError::NonFinite)
        }
    }
}

/// Smallest pivot magnitude accepted from the LU factorization.
const PIVOT_EPSILON: f64 = 1e-12;

/// Solve the normal equations by LU decomposition with partial pivoting.
fn solve(gram: DMatrix<f64>, moment: DVector<f64>) -> Result<DVector<f64>, RegressionError> {
    // ---
    let lu = gram.lu();
    if lu.u().diagonal().iter().any(|p| p.abs() < PIVOT_EPSILON) {
        return Err(RegressionError::Singular);
    }
    let x = lu.solve(&moment).ok_or(RegressionError::Singular)?;

    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(RegressionError::NonFinite)
    }
}

/// Serializable regressor held by a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressionModel {
    Forest(RandomForestRegressor),
    Linear(LinearRegressor),
}

impl Regressor for RegressionModel {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), RegressionError> {
        match self {
            RegressionModel::Forest(m) => m.fit(features, targets),
            RegressionModel::Linear(m) => m.fit(features, targets),
        }
    }

    fn predict(&self, features: &[f64]) -> Result<f64, RegressionError> {
        match self {
            RegressionModel::Forest(m) => m.predict(features),
            RegressionModel::Linear(m) => m.predict(features),
        }
    }
}

/// Which regressor a forecaster trains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressorKind {
    #[default]
    Forest,
    Linear,
}

impl RegressorKind {
    /// Untrained model of this kind with default parameters.
    pub fn build(self) -> RegressionModel {
        match self {
            RegressorKind::Forest => {
                RegressionModel::Forest(RandomForestRegressor::new(ForestParams::default()))
            }
            RegressorKind::Linear => RegressionModel::Linear(LinearRegressor::default()),
        }
    }
}

impl fmt::Display for RegressorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegressorKind::Forest => f.write_str("forest"),
            RegressorKind::Linear => f.write_str("linear"),
        }
    }
}

impl FromStr for RegressorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forest" | "random_forest" => Ok(RegressorKind::Forest),
            "linear" | "ridge" => Ok(RegressorKind::Linear),
            other => Err(format!("unknown regressor '{}'", other)),
        }
    }
}
