//! Application entry point for the `lemos-monitor` service.
//!
//! This binary orchestrates the full startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Opening the SQLite pool and creating the schema if needed
//! - Restoring the saved forecasting model, if any
//! - Starting the periodic forecast scheduler
//! - Mounting all API routes via the `routes` gateway and serving them
//!
//! On Ctrl-C the HTTP server drains gracefully, then the scheduler is
//! stopped after any in-flight cycle completes.
//!
//! # Environment Variables
//! See [`lemos_monitor::config::load_from_env`] for the service settings, plus:
//! - `LEMOS_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `LEMOS_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use lemos_monitor::notify::{LogNotifier, NotificationSink, SmsNotifier};
use lemos_monitor::store::{FileSnapshotStore, SqliteStore};
use lemos_monitor::{config, routes, schema, Collaborators, ForecastScheduler, Monitor};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database '{}': {}", cfg.db_url, e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool));
    let notifier: Arc<dyn NotificationSink> = match &cfg.twilio {
        Some(credentials) => Arc::new(SmsNotifier::new(credentials.clone(), cfg.recipients())),
        None => {
            tracing::warn!("SMS credentials not configured, alerts will only be logged");
            Arc::new(LogNotifier::new(cfg.recipients()))
        }
    };
    let collaborators = Collaborators {
        readings: store.clone(),
        alerts: store,
        snapshots: Arc::new(FileSnapshotStore::new(cfg.model_path.clone())),
        notifier,
    };

    let monitor = Arc::new(Monitor::new(
        cfg.monitor_settings(),
        cfg.forecast_config(),
        collaborators,
    ));
    monitor.restore_model().await;

    let scheduler = ForecastScheduler::start(monitor.clone(), cfg.scheduler_config());

    // Build app from routes gateway
    let app: Router = routes::router(monitor);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

// ---

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `LEMOS_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by `RUST_LOG`, else the `LEMOS_LOG_LEVEL` env var
///
/// Call once at startup, before any logging macros run.
fn init_tracing() {
    // ---
    let span_events = match env::var("LEMOS_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to LEMOS_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LEMOS_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
