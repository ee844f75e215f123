use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::calibration::CalibrationFactors;
use crate::models::{Metric, ThresholdUpdate, Thresholds};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/thresholds", get(get_thresholds).post(update_thresholds))
        .route("/api/calibration", post(update_calibration).get(get_calibration))
}

#[derive(Serialize)]
struct ThresholdsResponse {
    status: &'static str,
    thresholds: Thresholds,
}

async fn get_thresholds(State(monitor): State<AppState>) -> Json<Thresholds> {
    Json(monitor.thresholds())
}

/// Handle `POST /api/thresholds` with a partial map, e.g. `{"methane": 800}`.
async fn update_thresholds(
    State(monitor): State<AppState>,
    payload: Result<Json<ThresholdUpdate>, JsonRejection>,
) -> Result<Json<ThresholdsResponse>, ApiError> {
    // ---
    let Json(update) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let thresholds = monitor.set_thresholds(&update).await?;
    Ok(Json(ThresholdsResponse {
        status: "success",
        thresholds,
    }))
}

#[derive(Debug, Deserialize)]
struct CalibrationRequest {
    metric: String,
    factor: f64,
}

async fn get_calibration(State(monitor): State<AppState>) -> Json<CalibrationFactors> {
    Json(monitor.calibration())
}

/// Handle `POST /api/calibration` with `{"metric": "methane", "factor": 1.05}`.
async fn update_calibration(
    State(monitor): State<AppState>,
    payload: Result<Json<CalibrationRequest>, JsonRejection>,
) -> Result<Json<CalibrationFactors>, ApiError> {
    // ---
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let metric: Metric = request
        .metric
        .parse()
        .map_err(|e: crate::error::ValidationError| ApiError::bad_request(e.to_string()))?;
    Ok(Json(monitor.set_calibration(metric, request.factor)?))
}
