//! Configuration loader for the `lemos-monitor` service.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). Every variable is optional; invalid
//! values fail startup with a message naming the variable.
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::alerts::ForecastWarningMode;
use crate::forecast::regression::RegressorKind;
use crate::forecast::ForecastConfig;
use crate::monitor::{MonitorSettings, MAX_QUERY_WINDOW_HOURS};
use crate::notify::{parse_area_contacts, parse_contact_list, RecipientDirectory, TwilioCredentials};
use crate::scheduler::SchedulerConfig;

/// Parse an optional environment variable with `FromStr`, falling back to a default.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        parse_env!($lookup, $var_name, u32, $default)
    };
}

/// Read an optional string variable, treating blank values as unset.
macro_rules! optional_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name).filter(|v: &String| !v.trim().is_empty())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent
/// configuration snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// HTTP listen port.
    pub listen_port: u16,

    /// Areas evaluated every cycle even before they report.
    pub monitored_areas: Vec<i64>,

    /// Seconds between forecast cycles.
    pub forecast_interval_secs: u64,

    /// Seconds to wait after a failed cycle.
    pub forecast_retry_secs: u64,

    pub forecast_horizon_hours: u32,
    pub max_forecast_horizon_hours: u32,
    pub history_window_hours: u32,
    pub min_forecast_readings: u32,
    pub regressor: RegressorKind,
    pub confidence_start: f64,
    pub confidence_decay: f64,

    /// Model snapshot file.
    pub model_path: PathBuf,

    /// 0 disables alert deduplication.
    pub alert_cooldown_minutes: u32,
    pub warning_mode: ForecastWarningMode,

    /// `None` selects the log-only notifier.
    pub twilio: Option<TwilioCredentials>,
    pub area_contacts: HashMap<i64, Vec<String>>,
    pub emergency_contacts: Vec<String>,
}

/// Load configuration from environment variables with defaults.
///
/// Optional (all):
/// - `DATABASE_URL` – SQLite connection string (default: `sqlite://lemos.db?mode=rwc`)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_PORT` – HTTP port (default: 5000)
/// - `MONITORED_AREAS` – comma separated area ids (default: `1,2,3`)
/// - `FORECAST_INTERVAL_SECS` / `FORECAST_RETRY_SECS` – 3600 / 300
/// - `FORECAST_HORIZON_HOURS` / `MAX_FORECAST_HORIZON_HOURS` – 48 / 168
/// - `HISTORY_WINDOW_HOURS` / `MIN_FORECAST_READINGS` – 168 / 10
/// - `FORECAST_REGRESSOR` – `forest` or `linear` (default: `forest`)
/// - `FORECAST_CONFIDENCE_START` / `FORECAST_CONFIDENCE_DECAY` – 0.8 / 0.01
/// - `MODEL_PATH` – default `models/lemos_model.json`
/// - `ALERT_COOLDOWN_MINUTES` – default 0 (off)
/// - `FORECAST_WARNING_MODE` – `every_point` or `first_point`
/// - `TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`, `TWILIO_FROM_NUMBER`
/// - `SMS_AREA_CONTACTS`, `SMS_EMERGENCY_CONTACTS`
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Same as [`load_from_env`] over an arbitrary variable source.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // ---
    let db_url = optional_env!(lookup, "DATABASE_URL")
        .unwrap_or_else(|| "sqlite://lemos.db?mode=rwc".to_string());
    let db_pool_max = parse_env_u32!(lookup, "DB_POOL_MAX", 5);
    let listen_port = parse_env!(lookup, "LISTEN_PORT", u16, 5000);

    let monitored_areas = match optional_env!(lookup, "MONITORED_AREAS") {
        Some(raw) => parse_area_list(&raw).map_err(|e| anyhow!("Invalid MONITORED_AREAS: {}", e))?,
        None => vec![1, 2, 3],
    };

    let forecast_interval_secs = parse_env!(lookup, "FORECAST_INTERVAL_SECS", u64, 3600);
    let forecast_retry_secs = parse_env!(lookup, "FORECAST_RETRY_SECS", u64, 300);
    let forecast_horizon_hours = parse_env_u32!(lookup, "FORECAST_HORIZON_HOURS", 48);
    let max_forecast_horizon_hours = parse_env_u32!(lookup, "MAX_FORECAST_HORIZON_HOURS", 168);
    let history_window_hours = parse_env_u32!(lookup, "HISTORY_WINDOW_HOURS", 168);
    let min_forecast_readings = parse_env_u32!(lookup, "MIN_FORECAST_READINGS", 10);
    let regressor = parse_env!(lookup, "FORECAST_REGRESSOR", RegressorKind, RegressorKind::Forest);
    let confidence_start = parse_env!(lookup, "FORECAST_CONFIDENCE_START", f64, 0.8);
    let confidence_decay = parse_env!(lookup, "FORECAST_CONFIDENCE_DECAY", f64, 0.01);
    let model_path = PathBuf::from(
        optional_env!(lookup, "MODEL_PATH").unwrap_or_else(|| "models/lemos_model.json".to_string()),
    );
    let alert_cooldown_minutes = parse_env_u32!(lookup, "ALERT_COOLDOWN_MINUTES", 0);
    let warning_mode = parse_env!(
        lookup,
        "FORECAST_WARNING_MODE",
        ForecastWarningMode,
        ForecastWarningMode::EveryPoint
    );

    if forecast_interval_secs == 0 || forecast_retry_secs == 0 {
        return Err(anyhow!("FORECAST_INTERVAL_SECS and FORECAST_RETRY_SECS must be positive"));
    }
    if forecast_horizon_hours == 0 || max_forecast_horizon_hours == 0 {
        return Err(anyhow!("Forecast horizons must be at least one hour"));
    }
    if history_window_hours == 0 || history_window_hours > MAX_QUERY_WINDOW_HOURS {
        return Err(anyhow!(
            "HISTORY_WINDOW_HOURS must be between 1 and {}, got {}",
            MAX_QUERY_WINDOW_HOURS,
            history_window_hours
        ));
    }
    if !(0.0..=1.0).contains(&confidence_start) || !confidence_decay.is_finite() || confidence_decay < 0.0 {
        return Err(anyhow!(
            "Invalid forecast confidence: start {} must be in [0, 1], decay {} must be >= 0",
            confidence_start,
            confidence_decay
        ));
    }

    let twilio = match (
        optional_env!(lookup, "TWILIO_ACCOUNT_SID"),
        optional_env!(lookup, "TWILIO_AUTH_TOKEN"),
        optional_env!(lookup, "TWILIO_FROM_NUMBER"),
    ) {
        (Some(account_sid), Some(auth_token), Some(from_number)) => Some(TwilioCredentials {
            account_sid,
            auth_token,
            from_number,
        }),
        (None, None, None) => None,
        _ => {
            return Err(anyhow!(
                "TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_FROM_NUMBER must be set together"
            ))
        }
    };

    let area_contacts = match optional_env!(lookup, "SMS_AREA_CONTACTS") {
        Some(raw) => parse_area_contacts(&raw).map_err(|e| anyhow!("Invalid SMS_AREA_CONTACTS: {}", e))?,
        None => HashMap::new(),
    };
    let emergency_contacts = optional_env!(lookup, "SMS_EMERGENCY_CONTACTS")
        .map(|raw| parse_contact_list(&raw))
        .unwrap_or_default();

    Ok(Config {
        db_url,
        db_pool_max,
        listen_port,
        monitored_areas,
        forecast_interval_secs,
        forecast_retry_secs,
        forecast_horizon_hours,
        max_forecast_horizon_hours,
        history_window_hours,
        min_forecast_readings,
        regressor,
        confidence_start,
        confidence_decay,
        model_path,
        alert_cooldown_minutes,
        warning_mode,
        twilio,
        area_contacts,
        emergency_contacts,
    })
}

/// Parse a comma separated list of area ids.
pub fn parse_area_list(raw: &str) -> std::result::Result<Vec<i64>, std::num::ParseIntError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Mask the password in a connection URL.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // Skip the scheme separator, e.g. "sqlite://host".
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}

impl Config {
    pub fn forecast_config(&self) -> ForecastConfig {
        ForecastConfig {
            regressor: self.regressor,
            confidence_start: self.confidence_start,
            confidence_decay: self.confidence_decay,
            max_horizon_hours: self.max_forecast_horizon_hours,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        // ---
        MonitorSettings {
            monitored_areas: self.monitored_areas.clone(),
            history_window: chrono::Duration::hours(i64::from(self.history_window_hours)),
            min_forecast_readings: self.min_forecast_readings as usize,
            forecast_horizon_hours: self.forecast_horizon_hours,
            warning_mode: self.warning_mode,
            alert_cooldown: (self.alert_cooldown_minutes > 0)
                .then(|| chrono::Duration::minutes(i64::from(self.alert_cooldown_minutes))),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.forecast_interval_secs),
            retry_delay: Duration::from_secs(self.forecast_retry_secs),
        }
    }

    pub fn recipients(&self) -> RecipientDirectory {
        RecipientDirectory::new(self.area_contacts.clone(), self.emergency_contacts.clone())
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password and the SMS auth token.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL               : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX                : {}", self.db_pool_max);
        tracing::info!("  LISTEN_PORT                : {}", self.listen_port);
        tracing::info!("  MONITORED_AREAS            : {:?}", self.monitored_areas);
        tracing::info!("  FORECAST_INTERVAL_SECS     : {}", self.forecast_interval_secs);
        tracing::info!("  FORECAST_RETRY_SECS        : {}", self.forecast_retry_secs);
        tracing::info!("  FORECAST_HORIZON_HOURS     : {}", self.forecast_horizon_hours);
        tracing::info!("  MAX_FORECAST_HORIZON_HOURS : {}", self.max_forecast_horizon_hours);
        tracing::info!("  HISTORY_WINDOW_HOURS       : {}", self.history_window_hours);
        tracing::info!("  MIN_FORECAST_READINGS      : {}", self.min_forecast_readings);
        tracing::info!("  FORECAST_REGRESSOR         : {}", self.regressor);
        tracing::info!(
            "  FORECAST_CONFIDENCE        : start {} decay {}/h",
            self.confidence_start,
            self.confidence_decay
        );
        tracing::info!("  MODEL_PATH                 : {}", self.model_path.display());
        tracing::info!("  ALERT_COOLDOWN_MINUTES     : {}", self.alert_cooldown_minutes);
        tracing::info!("  FORECAST_WARNING_MODE      : {:?}", self.warning_mode);
        match &self.twilio {
            Some(twilio) => tracing::info!(
                "  TWILIO                     : account {} from {} token ****",
                twilio.account_sid,
                twilio.from_number
            ),
            None => tracing::info!("  TWILIO                     : not configured (log-only alerts)"),
        }
        tracing::info!("  SMS_AREA_CONTACTS          : {} areas", self.area_contacts.len());
        tracing::info!("  SMS_EMERGENCY_CONTACTS     : {}", self.emergency_contacts.len());
    }
}
