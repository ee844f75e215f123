//! Database schema management for the LEMOS reading store.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` and by test fixtures.

use sqlx::SqlitePool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `readings` table for calibrated readings and the `alerts`
/// table for emitted alerts. Safe to call on every startup; no-op if
/// objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    // Timestamps are fixed-width RFC 3339 text so they order lexically.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            area_id     INTEGER NOT NULL,
            methane     REAL    NOT NULL,
            co          REAL    NOT NULL,
            temperature REAL    NOT NULL,
            humidity    REAL    NOT NULL,
            water_level REAL    NOT NULL,
            timestamp   TEXT    NOT NULL,
            created_at  TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id           TEXT    PRIMARY KEY,
            type         TEXT    NOT NULL,
            area_id      INTEGER NOT NULL,
            severity     TEXT    NOT NULL,
            message      TEXT    NOT NULL,
            data         TEXT    NOT NULL,
            timestamp    TEXT    NOT NULL,
            acknowledged BOOLEAN DEFAULT FALSE,
            created_at   TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_area_time
            ON readings (area_id, timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alerts_time
            ON alerts (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
