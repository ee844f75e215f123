//! HTTP gateway.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared [`Monitor`] as state. Handlers only translate between
//! HTTP and the monitor's operations.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tracing::error;

use crate::error::MonitorError;
use crate::monitor::Monitor;

mod alerts;
mod forecast;
mod health;
mod readings;
mod status;
mod thresholds;

// ---

pub type AppState = Arc<Monitor>;

pub fn router(monitor: Arc<Monitor>) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(forecast::router())
        .merge(thresholds::router())
        .merge(alerts::router())
        .merge(status::router())
        .merge(health::router())
        .with_state(monitor)
}

/// Error body returned by every handler: `{ "error": "..." }`.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        // ---
        match e {
            MonitorError::Validation(_) | MonitorError::InsufficientData { .. } => {
                Self::bad_request(e.to_string())
            }
            other => {
                error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
