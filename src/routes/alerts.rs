use axum::{
    extract::rejection::QueryRejection,
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::models::Alert;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/alerts", get(recent_alerts))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    hours: Option<u32>,
}

/// Handle `GET /api/alerts?hours=`, newest first.
async fn recent_alerts(
    State(monitor): State<AppState>,
    query: Result<Query<AlertsQuery>, QueryRejection>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    Ok(Json(monitor.recent_alerts(params.hours.unwrap_or(24)).await?))
}
