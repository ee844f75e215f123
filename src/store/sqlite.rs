//! SQLite-backed reading and alert store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::{window_start, AlertStore, ReadingStore};
use crate::error::StoreError;
use crate::models::{Alert, Reading};
use crate::schema;

// ---

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap a pool whose schema has already been created.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// A single connection that is never recycled, since every new
    /// in-memory connection is a fresh empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // ---
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        schema::create_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", text, e)))
}

fn reading_from_row(row: &SqliteRow) -> Result<Reading, StoreError> {
    // ---
    let timestamp: String = row.try_get("timestamp")?;
    Ok(Reading {
        area_id: row.try_get("area_id")?,
        methane: row.try_get("methane")?,
        co: row.try_get("co")?,
        temperature: row.try_get("temperature")?,
        humidity: row.try_get("humidity")?,
        water_level: row.try_get("water_level")?,
        timestamp: decode_timestamp(&timestamp)?,
    })
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn store_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO readings (area_id, methane, co, temperature, humidity, water_level, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reading.area_id)
        .bind(reading.methane)
        .bind(reading.co)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .bind(reading.water_level)
        .bind(encode_timestamp(&reading.timestamp))
        .execute(&self.pool)
        .await?;

        debug!("Stored reading for area {}", reading.area_id);
        Ok(())
    }

    async fn query_readings(
        &self,
        area_id: Option<i64>,
        since: Duration,
    ) -> Result<Vec<Reading>, StoreError> {
        // ---
        let cutoff = encode_timestamp(&window_start(since));

        let rows = match area_id {
            Some(area_id) => {
                sqlx::query(
                    r#"
                    SELECT area_id, methane, co, temperature, humidity, water_level, timestamp
                    FROM readings
                    WHERE area_id = ? AND timestamp >= ?
                    ORDER BY timestamp ASC, id ASC
                    "#,
                )
                .bind(area_id)
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT area_id, methane, co, temperature, humidity, water_level, timestamp
                    FROM readings
                    WHERE timestamp >= ?
                    ORDER BY timestamp ASC, id ASC
                    "#,
                )
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(reading_from_row).collect()
    }

    async fn areas(&self) -> Result<Vec<i64>, StoreError> {
        // ---
        let rows = sqlx::query("SELECT DISTINCT area_id FROM readings ORDER BY area_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<i64, _>("area_id").map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl AlertStore for SqliteStore {
    async fn store_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        // ---
        let data = serde_json::to_string(alert)?;
        sqlx::query(
            r#"
            INSERT INTO alerts (id, type, area_id, severity, message, data, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(alert.kind.name())
        .bind(alert.area_id)
        .bind(alert.severity.to_string())
        .bind(alert.message())
        .bind(data)
        .bind(encode_timestamp(&alert.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_alerts(&self, since: Duration) -> Result<Vec<Alert>, StoreError> {
        // ---
        let cutoff = encode_timestamp(&window_start(since));
        let rows = sqlx::query(
            r#"
            SELECT data FROM alerts
            WHERE timestamp >= ?
            ORDER BY timestamp DESC, rowid DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Alert, StoreError> {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }
}
