// src/routes/health.rs
//! Liveness endpoint.
//!
//! `/health` is used by container orchestrators and CI to check that the
//! service answers HTTP requests. It reports whether a forecasting model is
//! loaded but never touches the stores.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_trained: bool,
}

/// Handle `GET /health`.
async fn health(State(monitor): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_trained: monitor.forecaster().is_trained(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
