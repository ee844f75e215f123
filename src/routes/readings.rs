use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{ApiError, AppState};
use crate::models::Reading;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/readings", get(list_readings).post(receive_readings))
        .route("/api/current/{area_id}", get(current_reading))
}

#[derive(Debug, Deserialize)]
struct ReadingsQuery {
    hours: Option<u32>,
    area_id: Option<i64>,
}

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    readings: Vec<Reading>,
}

/// Handle `POST /api/readings` with a single or multi-zone payload.
async fn receive_readings(
    State(monitor): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    // ---
    let Json(raw) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    debug!("POST /api/readings - {}", raw);

    let readings = monitor.ingest_payload(&raw).await?;
    info!("Stored {} reading(s)", readings.len());
    Ok(Json(IngestResponse {
        status: "success",
        readings,
    }))
}

/// Handle `GET /api/readings?hours=&area_id=`, oldest first.
async fn list_readings(
    State(monitor): State<AppState>,
    query: Result<Query<ReadingsQuery>, QueryRejection>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    // ---
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let readings = monitor
        .recent_readings(params.area_id, params.hours.unwrap_or(24))
        .await?;
    Ok(Json(readings))
}

/// Handle `GET /api/current/{area_id}`.
async fn current_reading(
    State(monitor): State<AppState>,
    Path(area_id): Path<i64>,
) -> Result<Json<Reading>, ApiError> {
    monitor
        .latest_reading(area_id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "No recent readings found"))
}
