use axum::{extract::State, routing::get, Json, Router};

use super::AppState;
use crate::monitor::MonitorStatus;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/status", get(status))
}

/// Handle `GET /api/status`: latest reading per area and live alert count.
async fn status(State(monitor): State<AppState>) -> Json<MonitorStatus> {
    Json(monitor.status())
}
