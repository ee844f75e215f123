use axum::{
    extract::rejection::QueryRejection,
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::monitor::AreaForecast;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/forecast", get(query_forecast))
        .route("/api/forecast/{area_id}", get(area_forecast))
}

#[derive(Debug, Deserialize)]
struct ForecastQuery {
    area_id: Option<i64>,
    hours: Option<u32>,
}

async fn forecast_for(
    monitor: AppState,
    area_id: i64,
    hours: Option<u32>,
) -> Result<Json<AreaForecast>, ApiError> {
    let hours = hours.unwrap_or(monitor.settings().forecast_horizon_hours);
    Ok(Json(monitor.get_forecast(area_id, hours).await?))
}

/// Handle `GET /api/forecast/{area_id}?hours=`.
///
/// Defaults to the periodic horizon. Too little history is a 400.
async fn area_forecast(
    State(monitor): State<AppState>,
    Path(area_id): Path<i64>,
    query: Result<Query<ForecastQuery>, QueryRejection>,
) -> Result<Json<AreaForecast>, ApiError> {
    // ---
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    forecast_for(monitor, area_id, params.hours).await
}

/// Handle `GET /api/forecast?area_id=&hours=`; `area_id` is required.
async fn query_forecast(
    State(monitor): State<AppState>,
    query: Result<Query<ForecastQuery>, QueryRejection>,
) -> Result<Json<AreaForecast>, ApiError> {
    // ---
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let area_id = params
        .area_id
        .ok_or_else(|| ApiError::bad_request("Missing required parameter: area_id"))?;
    forecast_for(monitor, area_id, params.hours).await
}
