//! Collaborator contracts the core persists through, and their
//! implementations.
//!
//! - [`ReadingStore`]: append-only calibrated readings.
//! - [`AlertStore`]: emitted alerts.
//! - [`ModelSnapshotStore`]: the trained forecasting model.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::forecast::TrainedModel;
use crate::models::{Alert, Reading};

mod memory;
mod snapshot;
mod sqlite;

pub use memory::MemoryStore;
pub use snapshot::FileSnapshotStore;
pub use sqlite::SqliteStore;

// ---

/// Start of a `since` window ending now, saturating at the earliest
/// representable instant.
pub(crate) fn window_start(since: Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(since)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn store_reading(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Readings from the last `since`, optionally for one area, oldest first.
    async fn query_readings(
        &self,
        area_id: Option<i64>,
        since: Duration,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Distinct area ids with at least one stored reading, ascending.
    async fn areas(&self) -> Result<Vec<i64>, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn store_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Alerts from the last `since`, newest first.
    async fn recent_alerts(&self, since: Duration) -> Result<Vec<Alert>, StoreError>;
}

#[async_trait]
pub trait ModelSnapshotStore: Send + Sync {
    async fn save(&self, model: &TrainedModel) -> Result<(), StoreError>;

    /// `Ok(None)` when no snapshot has been saved yet.
    async fn load(&self) -> Result<Option<TrainedModel>, StoreError>;
}
