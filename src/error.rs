//! Error taxonomy for the monitoring core.
//!
//! - [`ValidationError`]: malformed or missing input, rejected outright.
//! - [`RegressionError`]: numerical failure while fitting or predicting;
//!   never surfaced to forecast callers, who get the trend fallback.
//! - [`StoreError`]: collaborator I/O.
//! - [`MonitorError`]: what the core-exposed operations return.

use thiserror::Error;

use crate::models::Metric;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("field '{field}' is not numeric: {value}")]
    NotNumeric { field: String, value: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("invalid threshold for {metric}: {value}")]
    InvalidThreshold { metric: Metric, value: f64 },

    #[error("invalid calibration factor for {metric}: {value}")]
    InvalidCalibration { metric: Metric, value: f64 },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("forecast horizon must be at least one hour")]
    InvalidHorizon,

    #[error("query window of {hours} hours exceeds the {max} hour limit")]
    InvalidWindow { hours: u32, max: u32 },
}

#[derive(Debug, Error, PartialEq)]
pub enum RegressionError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("got {features} feature rows but {targets} targets")]
    LengthMismatch { features: usize, targets: usize },

    #[error("invalid feature dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("normal equations are singular")]
    Singular,

    #[error("non-finite value produced")]
    NonFinite,

    #[error("model has not been fitted")]
    NotFitted,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("insufficient data: need at least {required} readings, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("forecast cycle failed for all {0} areas")]
    CycleFailed(usize),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
