//! LEMOS gas monitoring core.
//!
//! Calibrates field readings, forecasts methane and CO concentrations and
//! raises alerts on current and forecast values. The binary wires the core
//! to SQLite, SMS delivery and an HTTP surface; see `main.rs`.

pub mod alerts;
pub mod calibration;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{MonitorError, Result};
pub use models::{Alert, ForecastPoint, Metric, Reading, Thresholds};
pub use monitor::{Collaborators, Monitor, MonitorSettings};
pub use scheduler::{ForecastScheduler, SchedulerConfig};
